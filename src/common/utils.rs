//! Utility functions for causalkv

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Percent-encoding set for keys placed in a URL path segment
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&')
    .add(b'"');

/// Maximum key length accepted on the client path
pub const MAX_KEY_LEN: usize = 50;

/// Encode a key for URL usage
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Build the URL for `endpoint` on a peer node address (host:port)
pub fn node_url(node: &str, endpoint: &str) -> String {
    format!("http://{}{}", node, endpoint)
}

/// Validate a client key (length measured in characters)
pub fn validate_key(key: &str) -> crate::Result<()> {
    let len = key.chars().count();
    if len > MAX_KEY_LEN {
        return Err(crate::Error::KeyTooLong {
            len,
            max: MAX_KEY_LEN,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key() {
        let encoded = encode_key("my/path to?key");
        assert_eq!(encoded, "my%2Fpath%20to%3Fkey");
        assert_eq!(encode_key("plain-key"), "plain-key");
    }

    #[test]
    fn test_node_url() {
        assert_eq!(
            node_url("10.10.0.2:8090", "/kvs/x"),
            "http://10.10.0.2:8090/kvs/x"
        );
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("normal-key").is_ok());
        assert!(validate_key(&"x".repeat(50)).is_ok());
        assert!(matches!(
            validate_key(&"x".repeat(51)),
            Err(crate::Error::KeyTooLong { len: 51, max: 50 })
        ));
        // Characters, not bytes
        assert!(validate_key(&"é".repeat(50)).is_ok());
    }
}
