//! Blocking HTTP helpers shared by the network collaborators.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use tracing::{debug, instrument};

use crate::error::{CollaboratorError, classify_status};

const USER_AGENT: &str = concat!("srag-report/", env!("CARGO_PKG_VERSION"));

/// Build the shared blocking client.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("build http client")
}

/// GET `url` and return the body as text.
#[instrument(skip(client))]
pub fn get_text(client: &Client, url: &str) -> Result<String, CollaboratorError> {
    let response = checked(client.get(url).send()?)?;
    let body = response.text()?;
    debug!(bytes = body.len(), "fetched");
    Ok(body)
}

/// Stream `url` into `dest`, writing through a temp file so a failed transfer
/// never leaves a partial dataset behind.
#[instrument(skip(client), fields(dest = %dest.display()))]
pub fn download_to(client: &Client, url: &str, dest: &Path) -> Result<u64, CollaboratorError> {
    let mut response = checked(client.get(url).send()?)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = dest.with_extension("part");
    let mut file = fs::File::create(&tmp_path)?;
    let copied = match response.copy_to(&mut file) {
        Ok(n) => n,
        Err(err) => {
            drop(file);
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
    };
    file.flush()?;
    drop(file);
    fs::rename(&tmp_path, dest)?;
    debug!(bytes = copied, "download complete");
    Ok(copied)
}

fn checked(response: Response) -> Result<Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(classify_status(status.as_u16(), &snippet))
}
