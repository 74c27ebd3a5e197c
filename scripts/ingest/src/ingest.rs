use crate::credentials::{CredentialSource, Credentials};
use crate::error::{IngestError, Result};
use crate::error_log::ErrorLog;
use crate::probe::round_duration;
use crate::sheet::SongRow;
use crate::storage::SongKey;
use async_trait::async_trait;
use colored::*;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Bearer token for the current run. Never printed.
#[derive(Clone)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Fields sent to the catalogue when registering a song.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSong {
    pub id: String,
    pub artist_id: String,
    pub album_id: String,
    pub title: String,
    /// Forwarded as read; the catalogue decides what it accepts.
    pub sort_order: Value,
    pub file_url: String,
    pub duration_secs: i64,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<SessionToken>;
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// `NotFound` unless the album exists under the artist.
    async fn verify_artist_album(&self, artist_id: &str, album_id: &str, token: &SessionToken) -> Result<()>;

    /// Creates the song record and returns its id. Not idempotent.
    async fn create_song(&self, song: &NewSong, token: &SessionToken) -> Result<String>;
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Uploads the file under `key` and returns its public URL.
    async fn upload_song(&self, key: &SongKey, file_path: &Path) -> Result<String>;
}

#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_secs(&self, path: &Path) -> Result<f64>;
}

// ---------------------------------------------------------------------------
// Row stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStage {
    Verifying,
    Uploading,
    Probing,
    Registering,
}

impl RowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verifying => "verifying artist/album",
            Self::Uploading => "uploading",
            Self::Probing => "reading duration",
            Self::Registering => "registering",
        }
    }
}

#[derive(Debug)]
struct RowFailure {
    stage: RowStage,
    error: IngestError,
    /// Object uploaded before the failure; it stays in the bucket.
    orphan: Option<String>,
}

impl RowFailure {
    fn at(stage: RowStage) -> impl FnOnce(IngestError) -> Self {
        move |error| Self { stage, error, orphan: None }
    }

    fn orphaning(stage: RowStage, key: &SongKey) -> impl FnOnce(IngestError) -> Self {
        let orphan = Some(key.object_key());
        move |error| Self { stage, error, orphan }
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Object keys uploaded for rows that failed afterwards.
    pub orphaned: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<'a> {
    pub catalog: &'a dyn CatalogApi,
    pub store: &'a dyn MediaStore,
    pub probe: &'a dyn DurationProbe,
    pub files_dir: PathBuf,
    pub error_log: &'a ErrorLog,
}

impl Pipeline<'_> {
    /// Processes every row in order. A failing row is marked and the loop moves on.
    pub async fn process_rows(&self, rows: &mut [SongRow], token: &SessionToken) -> BatchSummary {
        let mut summary = BatchSummary {
            total: rows.len(),
            ..BatchSummary::default()
        };

        for (idx, row) in rows.iter_mut().enumerate() {
            println!(
                "\n{} {} \"{}\"",
                format!("[{}/{}]", idx + 1, summary.total).bright_blue().bold(),
                "Processing song:".white(),
                row.title.bright_cyan().bold()
            );

            let song_id = uuid::Uuid::new_v4().to_string();

            match self.ingest_row(row, &song_id, token).await {
                Ok(record_id) => {
                    row.succeed();
                    summary.succeeded += 1;
                    println!(
                        "  {} Uploaded and saved \"{}\" ({})",
                        "✓".green().bold(),
                        row.title,
                        record_id.bright_black()
                    );
                }
                Err(failure) => {
                    let message = failure.error.to_string();
                    row.fail(&message);
                    summary.failed += 1;
                    println!(
                        "  {} Failed while {}: {}",
                        "✗".red().bold(),
                        failure.stage.as_str(),
                        message.bright_red()
                    );
                    self.error_log.record(&format!(
                        "Row {} \"{}\" failed while {}: {}",
                        row.line,
                        row.title,
                        failure.stage.as_str(),
                        message
                    ));
                    if let Some(key) = failure.orphan {
                        self.error_log
                            .record(&format!("Row {} left an unregistered object at {}", row.line, key));
                        summary.orphaned.push(key);
                    }
                }
            }
        }

        summary
    }

    async fn ingest_row(
        &self,
        row: &SongRow,
        song_id: &str,
        token: &SessionToken,
    ) -> std::result::Result<String, RowFailure> {
        let key = SongKey::new(&row.monk_id, &row.album_id, song_id);
        let file_path = self.files_dir.join(&row.file_path);

        self.catalog
            .verify_artist_album(&row.monk_id, &row.album_id, token)
            .await
            .map_err(RowFailure::at(RowStage::Verifying))?;
        println!("  {} Artist and album found", "✓".green());

        let file_url = self
            .store
            .upload_song(&key, &file_path)
            .await
            .map_err(RowFailure::at(RowStage::Uploading))?;
        println!("  {} File uploaded: {}", "✓".green(), key.object_key().bright_black());

        let seconds = self
            .probe
            .duration_secs(&file_path)
            .await
            .map_err(RowFailure::orphaning(RowStage::Probing, &key))?;

        let song = NewSong {
            id: song_id.to_string(),
            artist_id: row.monk_id.clone(),
            album_id: row.album_id.clone(),
            title: row.title.clone(),
            sort_order: row.sort_order.clone(),
            file_url,
            duration_secs: round_duration(seconds),
        };

        self.catalog
            .create_song(&song, token)
            .await
            .map_err(RowFailure::orphaning(RowStage::Registering, &key))
    }
}

/// Signs in, then runs the batch. Nothing is touched for any row unless
/// sign-in succeeds.
pub async fn run(
    credentials: &dyn CredentialSource,
    authenticator: &dyn Authenticator,
    pipeline: &Pipeline<'_>,
    rows: &mut [SongRow],
) -> Result<BatchSummary> {
    let credentials = credentials.credentials()?;
    let token = authenticator.sign_in(&credentials).await?;
    println!("{} Login successful", "✓".green());

    println!("Starting batch upload of {} song(s)...", rows.len());
    Ok(pipeline.process_rows(rows, &token).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{Cell, RowStatus, SongSheet};
    use serde_json::json;
    use std::sync::Mutex;

    // =========================================================================
    // Recording fakes
    // =========================================================================

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl Calls {
        fn push(&self, call: String) {
            self.0.lock().unwrap().push(call);
        }

        fn all(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Fails whichever step is named for rows whose monk_id matches.
    struct FakeWorld<'c> {
        calls: &'c Calls,
        fail_step: Option<(&'static str, &'static str)>,
        duration: f64,
        registered: Mutex<Vec<NewSong>>,
    }

    impl<'c> FakeWorld<'c> {
        fn new(calls: &'c Calls) -> Self {
            Self {
                calls,
                fail_step: None,
                duration: 200.0,
                registered: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, step: &'static str, monk_id: &'static str) -> Self {
            self.fail_step = Some((step, monk_id));
            self
        }

        fn fails(&self, step: &str, monk_id: &str) -> bool {
            self.fail_step.is_some_and(|(s, m)| s == step && m == monk_id)
        }
    }

    #[async_trait]
    impl<'c> CatalogApi for FakeWorld<'c> {
        async fn verify_artist_album(&self, artist_id: &str, album_id: &str, _token: &SessionToken) -> Result<()> {
            self.calls.push(format!("verify {artist_id}/{album_id}"));
            if self.fails("verify", artist_id) {
                return Err(IngestError::NotFound(format!("artist {artist_id} does not exist")));
            }
            Ok(())
        }

        async fn create_song(&self, song: &NewSong, _token: &SessionToken) -> Result<String> {
            self.calls.push(format!("register {}", song.artist_id));
            if self.fails("register", &song.artist_id) {
                return Err(IngestError::Registration("GraphQL error: boom".to_string()));
            }
            // Same rule as an `Int` field in the catalogue schema.
            if !(song.sort_order.is_null() || song.sort_order.is_i64()) {
                return Err(IngestError::Registration(format!(
                    "GraphQL error: Int cannot represent non-integer value: {}",
                    song.sort_order
                )));
            }
            self.registered.lock().unwrap().push(song.clone());
            Ok(format!("r-{}", song.artist_id))
        }
    }

    #[async_trait]
    impl<'c> MediaStore for FakeWorld<'c> {
        async fn upload_song(&self, key: &SongKey, file_path: &Path) -> Result<String> {
            self.calls.push(format!("upload {} {}", key.owner_id, file_path.display()));
            if self.fails("upload", &key.owner_id) {
                return Err(IngestError::Upload("connection reset".to_string()));
            }
            Ok(key.public_url("https://media.example.com"))
        }
    }

    #[async_trait]
    impl<'c> DurationProbe for FakeWorld<'c> {
        async fn duration_secs(&self, path: &Path) -> Result<f64> {
            let owner = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            self.calls.push(format!("probe {owner}"));
            if self.fails("probe", &owner) {
                return Err(IngestError::Probe("unsupported format".to_string()));
            }
            Ok(self.duration)
        }
    }

    struct FakeAuth {
        calls: Calls,
        succeed: bool,
    }

    #[async_trait]
    impl Authenticator for FakeAuth {
        async fn sign_in(&self, credentials: &Credentials) -> Result<SessionToken> {
            self.calls.push(format!("sign_in {}", credentials.username));
            if self.succeed {
                Ok(SessionToken::new("tok".to_string()))
            } else {
                Err(IngestError::AuthFailure("server responded with HTTP 401".to_string()))
            }
        }
    }

    struct FixedCredentials;

    impl CredentialSource for FixedCredentials {
        fn credentials(&self) -> Result<Credentials> {
            Ok(Credentials {
                username: "ops".to_string(),
                password: "pw".to_string(),
            })
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Rows whose file is named after the artist so the probe fake can tell them apart.
    fn rows(monk_ids: &[&str]) -> Vec<SongRow> {
        let headers = ["monk_id", "album_id", "title", "sort_order", "file_path"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let records = monk_ids
            .iter()
            .enumerate()
            .map(|(i, m)| {
                vec![
                    Cell::Text(m.to_string()),
                    Cell::Text(format!("album-{m}")),
                    Cell::Text(format!("Song {m}")),
                    Cell::Number((i + 1) as f64),
                    Cell::Text(format!("{m}.mp3")),
                ]
            })
            .collect();
        SongSheet::from_records(headers, records).rows
    }

    fn pipeline<'a>(world: &'a FakeWorld<'a>, log: &'a ErrorLog) -> Pipeline<'a> {
        Pipeline {
            catalog: world,
            store: world,
            probe: world,
            files_dir: PathBuf::from("/data/files"),
            error_log: log,
        }
    }

    fn assert_status_exclusive(rows: &[SongRow]) {
        for row in rows {
            match row.status {
                RowStatus::Success => assert!(row.error_message.is_empty()),
                RowStatus::Error => assert!(!row.error_message.is_empty()),
                RowStatus::Pending => panic!("row {} left pending", row.line),
            }
        }
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[tokio::test]
    async fn test_single_row_success() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls);
        let log = ErrorLog::disabled();
        let mut rows = rows(&["m1"]);

        let summary = pipeline(&world, &log)
            .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
            .await;

        assert_eq!(rows[0].status, RowStatus::Success);
        assert_eq!(rows[0].error_message, "");
        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
        assert!(summary.orphaned.is_empty());

        assert_eq!(
            calls.all(),
            vec![
                "verify m1/album-m1".to_string(),
                "upload m1 /data/files/m1.mp3".to_string(),
                "probe m1".to_string(),
                "register m1".to_string(),
            ]
        );

        let registered = world.registered.lock().unwrap();
        let song = &registered[0];
        assert_eq!(song.duration_secs, 200);
        assert_eq!(song.sort_order, json!(1));
        assert_eq!(song.title, "Song m1");
        assert_eq!(
            song.file_url,
            format!("https://media.example.com/song/m1/album-m1/{}.mp3", song.id)
        );
    }

    #[tokio::test]
    async fn test_verification_failure_skips_remaining_steps() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls).failing("verify", "m1");
        let log = ErrorLog::disabled();
        let mut rows = rows(&["m1"]);

        let summary = pipeline(&world, &log)
            .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
            .await;

        assert_eq!(calls.all(), vec!["verify m1/album-m1".to_string()]);
        assert_eq!(rows[0].status, RowStatus::Error);
        assert!(!rows[0].error_message.is_empty());
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 1);
        assert!(summary.orphaned.is_empty());
    }

    #[tokio::test]
    async fn test_duration_is_rounded_before_registration() {
        for (probed, expected) in [(123.6, 124), (123.4, 123)] {
            let calls = Calls::default();
            let mut world = FakeWorld::new(&calls);
            world.duration = probed;
            let log = ErrorLog::disabled();
            let mut rows = rows(&["m1"]);

            pipeline(&world, &log)
                .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
                .await;

            assert_eq!(world.registered.lock().unwrap()[0].duration_secs, expected);
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_row() {
        for step in ["verify", "upload", "probe", "register"] {
            let calls = Calls::default();
            let world = FakeWorld::new(&calls).failing(step, "m2");
            let log = ErrorLog::disabled();
            let mut rows = rows(&["m1", "m2", "m3"]);

            let summary = pipeline(&world, &log)
                .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
                .await;

            assert_eq!(rows[0].status, RowStatus::Success, "step {step}");
            assert_eq!(rows[1].status, RowStatus::Error, "step {step}");
            assert_eq!(rows[2].status, RowStatus::Success, "step {step}");
            assert_eq!(summary.succeeded, 2);
            assert_eq!(summary.failed, 1);
            assert_status_exclusive(&rows);
        }
    }

    #[tokio::test]
    async fn test_rows_keep_input_order() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls).failing("upload", "b");
        let log = ErrorLog::disabled();
        let mut rows = rows(&["c", "a", "b", "d"]);

        pipeline(&world, &log)
            .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
            .await;

        let order: Vec<&str> = rows.iter().map(|r| r.monk_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b", "d"]);

        let verified: Vec<String> = calls
            .all()
            .into_iter()
            .filter(|c| c.starts_with("verify"))
            .collect();
        assert_eq!(
            verified,
            vec!["verify c/album-c", "verify a/album-a", "verify b/album-b", "verify d/album-d"]
        );
    }

    #[tokio::test]
    async fn test_late_failures_report_orphaned_objects() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls).failing("register", "m1");
        let log = ErrorLog::disabled();
        let mut rows = rows(&["m1"]);

        let summary = pipeline(&world, &log)
            .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
            .await;

        assert_eq!(summary.orphaned.len(), 1);
        assert!(summary.orphaned[0].starts_with("storage/song/m1/album-m1/"));
        assert!(rows[0].error_message.contains("boom"));
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_no_orphan() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls).failing("upload", "m1");
        let log = ErrorLog::disabled();
        let mut rows = rows(&["m1"]);

        let summary = pipeline(&world, &log)
            .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
            .await;

        assert!(summary.orphaned.is_empty());
        assert!(!calls.all().iter().any(|c| c.starts_with("probe") || c.starts_with("register")));
    }

    #[tokio::test]
    async fn test_non_integer_sort_order_is_forwarded_as_read() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls);
        let log = ErrorLog::disabled();
        let headers = ["monk_id", "album_id", "title", "sort_order", "file_path"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let row = |m: &str, sort_order: Cell| {
            vec![
                Cell::Text(m.to_string()),
                Cell::Text(format!("album-{m}")),
                Cell::Text(format!("Song {m}")),
                sort_order,
                Cell::Text(format!("{m}.mp3")),
            ]
        };
        let mut rows = SongSheet::from_records(
            headers,
            vec![
                row("m1", Cell::Number(1.5)),
                row("m2", Cell::Text("first".to_string())),
                row("m3", Cell::Empty),
            ],
        )
        .rows;

        let summary = pipeline(&world, &log)
            .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
            .await;

        assert_eq!(rows[0].status, RowStatus::Error);
        assert!(rows[0].error_message.contains("1.5"));
        assert_eq!(rows[1].status, RowStatus::Error);
        assert!(rows[1].error_message.contains("first"));
        assert_eq!(rows[2].status, RowStatus::Success);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);

        let registered = world.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].sort_order, Value::Null);
    }

    #[tokio::test]
    async fn test_each_row_gets_a_fresh_song_id() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls);
        let log = ErrorLog::disabled();
        let mut rows = rows(&["m1", "m2"]);

        pipeline(&world, &log)
            .process_rows(&mut rows, &SessionToken::new("tok".to_string()))
            .await;

        let registered = world.registered.lock().unwrap();
        assert_eq!(registered.len(), 2);
        assert_ne!(registered[0].id, registered[1].id);
    }

    #[tokio::test]
    async fn test_run_stops_when_sign_in_fails() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls);
        let log = ErrorLog::disabled();
        let auth = FakeAuth {
            calls: Calls::default(),
            succeed: false,
        };
        let mut rows = rows(&["m1", "m2"]);

        let err = run(&FixedCredentials, &auth, &pipeline(&world, &log), &mut rows)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::AuthFailure(_)));
        assert_eq!(auth.calls.all(), vec!["sign_in ops".to_string()]);
        assert!(calls.all().is_empty());
        assert!(rows.iter().all(|r| r.status == RowStatus::Pending));
    }

    #[tokio::test]
    async fn test_run_processes_rows_after_sign_in() {
        let calls = Calls::default();
        let world = FakeWorld::new(&calls);
        let log = ErrorLog::disabled();
        let auth = FakeAuth {
            calls: Calls::default(),
            succeed: true,
        };
        let mut rows = rows(&["m1"]);

        let summary = run(&FixedCredentials, &auth, &pipeline(&world, &log), &mut rows)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.total, 1);
        assert_eq!(rows[0].status, RowStatus::Success);
    }

    #[test]
    fn test_session_token_debug_is_redacted() {
        let token = SessionToken::new("very-secret".to_string());
        assert!(!format!("{:?}", token).contains("very-secret"));
        assert_eq!(token.as_str(), "very-secret");
    }
}
