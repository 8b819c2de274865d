use serde::Deserialize;
use tracing::warn;

use crate::{config::non_empty, error::ApiError};

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Checks a CAPTCHA token against a siteverify endpoint (Turnstile, or any
/// service speaking the same form protocol). Only called when a secret is
/// configured.
pub async fn verify_token(
    client: &reqwest::Client,
    verify_url: &str,
    secret: &str,
    token: Option<&str>,
) -> Result<(), ApiError> {
    let token = token.and_then(non_empty).ok_or_else(|| {
        ApiError::CaptchaRejected("complete the CAPTCHA before downloading".to_string())
    })?;

    let response = client
        .post(verify_url)
        .form(&[("secret", secret), ("response", token)])
        .send()
        .await
        .map_err(|error| {
            warn!("CAPTCHA verification request failed: {error}");
            ApiError::CaptchaRejected("could not verify the CAPTCHA, try again".to_string())
        })?;

    if !response.status().is_success() {
        warn!(
            "CAPTCHA verification returned HTTP {}",
            response.status()
        );
        return Err(ApiError::CaptchaRejected(
            "could not verify the CAPTCHA, try again".to_string(),
        ));
    }

    let verification = response
        .json::<SiteVerifyResponse>()
        .await
        .map_err(|error| {
            warn!("invalid CAPTCHA verification response: {error}");
            ApiError::CaptchaRejected("could not verify the CAPTCHA, try again".to_string())
        })?;

    if !verification.success {
        warn!("CAPTCHA rejected: {:?}", verification.error_codes);
        return Err(ApiError::CaptchaRejected(
            "the CAPTCHA was rejected, reload the page and retry".to_string(),
        ));
    }

    Ok(())
}
