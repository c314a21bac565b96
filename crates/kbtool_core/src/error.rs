#[derive(Debug, thiserror::Error)]
pub enum KbError {
    #[error("Error {status}: {reason} on requesting {url}")]
    HttpStatus {
        status: u16,
        reason: String,
        url: String,
    },

    #[error("no <html class=\"no-js\"> element in page {url}")]
    MissingMarker { url: String },

    #[error("marker element in page {url} has no `{attribute}` attribute")]
    MissingPageId {
        url: String,
        attribute: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::KbError;

    #[test]
    fn http_status_message_names_status_reason_and_url() {
        let error = KbError::HttpStatus {
            status: 404,
            reason: "Not Found".to_string(),
            url: "https://kb.example/x".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Error 404: Not Found on requesting https://kb.example/x"
        );
    }

    #[test]
    fn named_errors_survive_anyhow_wrapping() {
        let wrapped = anyhow::Error::new(KbError::MissingMarker {
            url: "https://kb.example/a".to_string(),
        })
        .context("failed to resolve page ids");
        let inner = wrapped.downcast_ref::<KbError>().expect("downcast");
        assert!(matches!(inner, KbError::MissingMarker { .. }));
    }
}
