use vx_domain::Error;

/// Map a reqwest error onto the domain error type, preserving enough
/// structure for retry classification.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Timeout(e.to_string());
    }
    match e.status() {
        Some(status) => Error::Http {
            status: status.as_u16(),
            message: e.to_string(),
        },
        None => Error::Http {
            status: 0,
            message: e.to_string(),
        },
    }
}

/// Turn a non-2xx response into an [`Error::Http`] carrying the body.
pub(crate) async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Http {
        status: status.as_u16(),
        message: body,
    })
}
