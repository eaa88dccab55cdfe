//! Outbound AT command text.

/// Prefix of every device command.
pub const AT_PREFIX: &str = "AT+";

/// Derive the correlation key the device echoes back in the reply's `name`.
///
/// Strips the `AT+` prefix, any `=arguments` suffix and trailing line
/// terminators. A trailing `?` is kept because query replies carry it.
///
/// ```
/// use atlink::protocol::extract_command_name;
///
/// assert_eq!(extract_command_name("AT+ID?"), "ID?");
/// assert_eq!(extract_command_name("AT+MODEL=2"), "MODEL");
/// assert_eq!(extract_command_name("AT+INVOKE=-1,0,0"), "INVOKE");
/// ```
pub fn extract_command_name(text: &str) -> String {
    let text = text.trim_end_matches(['\r', '\n']);
    let body = text.strip_prefix(AT_PREFIX).unwrap_or(text);
    let name = match body.find('=') {
        Some(index) => &body[..index],
        None => body,
    };
    name.to_string()
}

/// Bytes to put on the wire for `text`: the command followed by one CR.
pub fn encode_command(text: &str) -> Vec<u8> {
    let mut bytes = text.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
    bytes.push(b'\r');
    bytes
}

/// `AT+NAME?`
pub fn query(name: &str) -> String {
    format!("{AT_PREFIX}{name}?")
}

/// `AT+NAME=args`
pub fn set(name: &str, args: impl std::fmt::Display) -> String {
    format!("{AT_PREFIX}{name}={args}")
}

/// `AT+NAME`
pub fn exec(name: &str) -> String {
    format!("{AT_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_command_name() {
        assert_eq!(extract_command_name("AT+ID?"), "ID?");
        assert_eq!(extract_command_name("AT+MODEL=2"), "MODEL");
        assert_eq!(extract_command_name("AT+INVOKE=-1,0,0"), "INVOKE");
        assert_eq!(extract_command_name("AT+BREAK"), "BREAK");
    }

    #[test]
    fn test_extract_command_name_strips_terminators() {
        assert_eq!(extract_command_name("AT+ID?\r"), "ID?");
        assert_eq!(extract_command_name("AT+TSCORE=50\r\n"), "TSCORE");
    }

    #[test]
    fn test_extract_command_name_keeps_quoted_args_out() {
        assert_eq!(
            extract_command_name("AT+TRIGGER=\"0,2,50,1,0,1\""),
            "TRIGGER"
        );
    }

    #[test]
    fn test_extract_command_name_without_prefix() {
        assert_eq!(extract_command_name("ID?"), "ID?");
    }

    #[test]
    fn test_encode_command_appends_single_cr() {
        assert_eq!(encode_command("AT+ID?"), b"AT+ID?\r".to_vec());
        assert_eq!(encode_command("AT+ID?\r"), b"AT+ID?\r".to_vec());
    }

    #[test]
    fn test_builders() {
        assert_eq!(query("TSCORE"), "AT+TSCORE?");
        assert_eq!(set("MODEL", 2), "AT+MODEL=2");
        assert_eq!(exec("BREAK"), "AT+BREAK");
    }
}
