//! Limited file-URI to path conversion.

use log::error;
use url::Url;

/// Converts a `file://` URI into a filesystem path.
///
/// Anything that does not parse as a file URI is handed back unchanged so the
/// caller still has a usable display name.
pub fn uri_to_path(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(url) => match url.to_file_path() {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(()) => uri.to_string(),
        },
        Err(err) => {
            error!("Failed to convert uri '{}' to path, {}", uri, err);
            uri.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_file_uri() {
        assert_eq!(uri_to_path("file:///workspace/kernel.cl"), "/workspace/kernel.cl");
    }

    #[test]
    fn decodes_percent_escapes() {
        assert_eq!(
            uri_to_path("file:///home/user/my%20kernels/blur.cl"),
            "/home/user/my kernels/blur.cl"
        );
    }

    #[test]
    fn non_uri_input_is_returned_unchanged() {
        assert_eq!(uri_to_path("kernel.cl"), "kernel.cl");
    }

    #[test]
    fn non_file_scheme_is_returned_unchanged() {
        assert_eq!(
            uri_to_path("https://example.com/kernel.cl"),
            "https://example.com/kernel.cl"
        );
    }
}
