//! Shared plumbing for the outbound HTTP clients.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::error::ServiceError;

/// Builds the client every collaborator uses.
pub fn client(timeout: Duration) -> Result<Client, ServiceError> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()?)
}

/// Passes successful responses through and turns everything else into
/// [`ServiceError::UnexpectedStatus`] carrying the response body.
pub async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await?;
    Err(ServiceError::UnexpectedStatus { status, text })
}

/// Joins a base URL and a path without doubling or dropping the slash.
pub fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
