//! Authorization header for requests against managed instances.

use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::config::Credentials;
use crate::{Error, Result};

/// Claims the servers expect in a cluster-internal token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub server_id: String,
    pub iss: String,
}

/// Builds the `Authorization` header value for `credentials`.
///
/// A JWT secret (read from the first file of `jwt_secret_folder`, or taken
/// from `jwt_secret`) yields a `bearer` HS256 token; otherwise HTTP Basic
/// with username and password.
pub fn authorization_header(credentials: &Credentials) -> Result<String> {
    match jwt_secret(credentials)? {
        Some(secret) => {
            let claims = Claims {
                server_id: "none".to_string(),
                iss: "arangodb".to_string(),
            };
            let token = encode(
                &Header::default(),
                &claims,
                &EncodingKey::from_secret(secret.as_bytes()),
            )
            .map_err(|e| Error::Auth(e.to_string()))?;
            Ok(format!("bearer {token}"))
        }
        None => {
            let pair = format!("{}:{}", credentials.username, credentials.password);
            Ok(format!("Basic {}", STANDARD.encode(pair)))
        }
    }
}

fn jwt_secret(credentials: &Credentials) -> Result<Option<String>> {
    match &credentials.jwt_secret_folder {
        Some(folder) => first_file_contents(folder),
        None => Ok(credentials.jwt_secret.clone()),
    }
}

fn first_file_contents(folder: &Path) -> Result<Option<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    match files.first() {
        Some(path) => Ok(Some(fs::read_to_string(path)?)),
        None => Ok(None),
    }
}
