use crate::config::StorageConfig;
use crate::error::{IngestError, Result};
use crate::ingest::MediaStore;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use std::time::Duration;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a song lives in the bucket. Consumers of the public URL depend on
/// this layout, so it must not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongKey {
    pub owner_id: String,
    pub album_id: String,
    pub song_id: String,
}

impl SongKey {
    pub fn new(owner_id: &str, album_id: &str, song_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            album_id: album_id.to_string(),
            song_id: song_id.to_string(),
        }
    }

    pub fn object_key(&self) -> String {
        format!("storage/song/{}/{}/{}.mp3", self.owner_id, self.album_id, self.song_id)
    }

    pub fn public_url(&self, media_url: &str) -> String {
        format!(
            "{}/song/{}/{}/{}.mp3",
            media_url.trim_end_matches('/'),
            self.owner_id,
            self.album_id,
            self.song_id
        )
    }
}

// ---------------------------------------------------------------------------
// S3 Upload
// ---------------------------------------------------------------------------

pub struct R2Store {
    client: S3Client,
    bucket: String,
    media_url: String,
}

impl R2Store {
    pub fn new(client: S3Client, bucket: &str, media_url: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            media_url: media_url.to_string(),
        }
    }

    pub async fn connect(config: &StorageConfig, media_url: &str) -> Self {
        let mut aws_config = aws_config::defaults(BehaviorVersion::latest());

        aws_config = aws_config.region(aws_sdk_s3::config::Region::new(config.region.clone()));
        aws_config = aws_config.credentials_provider(aws_sdk_s3::config::Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "song-ingest",
        ));
        aws_config = aws_config.timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(UPLOAD_TIMEOUT)
                .build(),
        );

        let aws_config = aws_config.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config).endpoint_url(&config.endpoint);

        Self::new(S3Client::from_conf(s3_config.build()), &config.bucket, media_url)
    }
}

#[async_trait]
impl MediaStore for R2Store {
    async fn upload_song(&self, key: &SongKey, file_path: &Path) -> Result<String> {
        let object_key = key.object_key();

        let content = tokio::fs::read(file_path)
            .await
            .map_err(|e| IngestError::Upload(format!("cannot read {}: {}", file_path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(content))
            .content_type("audio/mpeg")
            .send()
            .await
            .map_err(|e| IngestError::Upload(format!("{}: {}", object_key, DisplayErrorContext(&e))))?;

        Ok(key.public_url(&self.media_url))
    }
}
