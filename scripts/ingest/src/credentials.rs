use crate::error::{IngestError, Result};
use std::fmt;
use std::io::{BufRead, Write};

/// Username/password pair for the sign-in endpoint. Lives for one run only.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait CredentialSource {
    fn credentials(&self) -> Result<Credentials>;
}

/// Uses whatever was supplied up front and asks the operator for the rest.
/// The password prompt is masked.
pub struct OperatorPrompt {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CredentialSource for OperatorPrompt {
    fn credentials(&self) -> Result<Credentials> {
        let username = match &self.username {
            Some(u) => u.clone(),
            None => prompt_line("Enter your username: ")?,
        };

        let password = match &self.password {
            Some(p) => p.clone(),
            None => rpassword::prompt_password("Enter your password: ")
                .map_err(|e| IngestError::Credentials(e.to_string()))?,
        };

        Ok(Credentials { username, password })
    }
}

fn prompt_line(label: &str) -> Result<String> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", label)
        .and_then(|_| stdout.flush())
        .map_err(|e| IngestError::Credentials(e.to_string()))?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| IngestError::Credentials(e.to_string()))?;

    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
