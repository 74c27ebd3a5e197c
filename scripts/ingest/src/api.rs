use crate::config::IngestConfig;
use crate::credentials::Credentials;
use crate::error::{IngestError, Result};
use crate::ingest::{Authenticator, CatalogApi, NewSong, SessionToken};
use async_trait::async_trait;
use reqwest::header::CONNECTION;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

const VERIFY_QUERY: &str = r#"
    query Artist($where: ArtistWhereUniqueInput!, $albumsWhere2: AlbumWhereInput) {
      artist(where: $where) {
        id
        albums(where: $albumsWhere2) {
          id
        }
      }
    }
"#;

const CREATE_SONG_MUTATION: &str = r#"
    mutation CreateOneSong($data: SongCreateInput!) {
      createOneSong(data: $data) {
        id
      }
    }
"#;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SignInResponse {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

impl<T> GraphQlResponse<T> {
    /// Any `errors` field fails the call, even an empty one.
    fn first_error(&self) -> Option<&str> {
        self.errors.as_ref().map(|errs| {
            errs.first()
                .map_or("server returned an empty error list", |e| e.message.as_str())
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ArtistData {
    artist: Option<ArtistNode>,
}

#[derive(Debug, Deserialize)]
struct ArtistNode {
    #[serde(default)]
    albums: Vec<IdNode>,
}

#[derive(Debug, Deserialize)]
struct CreateSongData {
    #[serde(rename = "createOneSong")]
    create_one_song: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Talks to the sign-in endpoint and the GraphQL endpoint.
pub struct ApiClient {
    http: Client,
    api_base_url: String,
    graphql_endpoint: String,
}

impl ApiClient {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        Self::with_endpoints(&config.api_base_url, &config.graphql_endpoint)
    }

    pub fn with_endpoints(api_base_url: &str, graphql_endpoint: &str) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            graphql_endpoint: graphql_endpoint.to_string(),
        })
    }

    fn graphql(&self, token: &SessionToken, query: &str, variables: serde_json::Value) -> RequestBuilder {
        self.http
            .post(&self.graphql_endpoint)
            .bearer_auth(token.as_str())
            .header("x-auth-type", "JWT")
            .json(&json!({ "query": query, "variables": variables }))
    }
}

/// Reads the body and parses it as a GraphQL envelope, keeping the HTTP
/// status around for the caller.
async fn read_envelope<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> std::result::Result<(reqwest::StatusCode, Option<GraphQlResponse<T>>), reqwest::Error> {
    let status = resp.status();
    let text = resp.text().await?;
    Ok((status, serde_json::from_str(&text).ok()))
}

#[async_trait]
impl Authenticator for ApiClient {
    async fn sign_in(&self, credentials: &Credentials) -> Result<SessionToken> {
        let url = format!("{}/auth/signin", self.api_base_url);

        let resp = self
            .http
            .post(&url)
            .json(&json!({ "name": credentials.username, "pwd": credentials.password }))
            .send()
            .await
            .map_err(|_| IngestError::AuthFailure("Unable to connect to the server".to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::AuthFailure(format!(
                "server responded with HTTP {}, please check your credentials",
                status.as_u16()
            )));
        }

        let body: SignInResponse = resp
            .json()
            .await
            .map_err(|_| IngestError::AuthFailure("unexpected sign-in response".to_string()))?;

        body.access_token
            .filter(|t| !t.is_empty())
            .map(SessionToken::new)
            .ok_or_else(|| {
                IngestError::AuthFailure("no access token returned, please check your credentials".to_string())
            })
    }
}

#[async_trait]
impl CatalogApi for ApiClient {
    async fn verify_artist_album(&self, artist_id: &str, album_id: &str, token: &SessionToken) -> Result<()> {
        let variables = json!({
            "where": { "id": artist_id },
            "albumsWhere2": { "id": { "equals": album_id } },
        });

        let resp = self
            .graphql(token, VERIFY_QUERY, variables)
            .header(CONNECTION, "close")
            .timeout(VERIFY_TIMEOUT)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let (status, envelope) = read_envelope::<ArtistData>(resp)
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let envelope = match envelope {
            Some(env) => env,
            None => {
                return Err(IngestError::Transport(format!(
                    "HTTP {} from {}",
                    status.as_u16(),
                    self.graphql_endpoint
                )))
            }
        };

        if let Some(message) = envelope.first_error() {
            return Err(IngestError::NotFound(format!(
                "artist {} / album {} ({})",
                artist_id, album_id, message
            )));
        }
        if !status.is_success() {
            return Err(IngestError::Transport(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.graphql_endpoint
            )));
        }

        match envelope.data.and_then(|d| d.artist) {
            Some(artist) if !artist.albums.is_empty() => Ok(()),
            Some(_) => Err(IngestError::NotFound(format!(
                "album {} does not belong to artist {}",
                album_id, artist_id
            ))),
            None => Err(IngestError::NotFound(format!("artist {} does not exist", artist_id))),
        }
    }

    async fn create_song(&self, song: &NewSong, token: &SessionToken) -> Result<String> {
        let variables = json!({
            "data": {
                "id": song.id,
                "title": song.title,
                "sort_order": song.sort_order,
                "duration": song.duration_secs,
                "file_name": song.file_url,
                "artist": { "connect": { "id": song.artist_id } },
                "album": { "connect": { "id": song.album_id } },
            }
        });

        let resp = self
            .graphql(token, CREATE_SONG_MUTATION, variables)
            .send()
            .await
            .map_err(|e| IngestError::Registration(format!("request failed: {}", e)))?;

        let (status, envelope) = read_envelope::<CreateSongData>(resp)
            .await
            .map_err(|e| IngestError::Registration(format!("request failed: {}", e)))?;

        let envelope = envelope.ok_or_else(|| {
            IngestError::Registration(format!("unexpected response (HTTP {})", status.as_u16()))
        })?;

        if let Some(message) = envelope.first_error() {
            return Err(IngestError::Registration(format!("GraphQL error: {}", message)));
        }

        envelope
            .data
            .and_then(|d| d.create_one_song)
            .map(|node| node.id)
            .ok_or_else(|| IngestError::Registration("response did not include a song id".to_string()))
    }
}
