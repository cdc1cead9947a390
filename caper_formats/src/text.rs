use anyhow::{bail, Result};

/// Resolves a NUL-terminated string at `offset` inside a script blob.
///
/// Dialogue tables address their display text and speaker names by byte
/// offset into a companion script resource. An offset outside the blob is an
/// authoring error; an unterminated string runs to the end of the blob.
pub fn read_script_string(script: &[u8], offset: u16) -> Result<String> {
    let start = offset as usize;
    if start > script.len() {
        bail!(
            "script offset {start} beyond blob length {}",
            script.len()
        );
    }

    let mut end = start;
    while end < script.len() && script[end] != 0 {
        end += 1;
    }

    Ok(String::from_utf8_lossy(&script[start..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_terminated_string() {
        let script = b"IGNORED\0HELLO THERE\0TAIL\0";
        assert_eq!(read_script_string(script, 8).unwrap(), "HELLO THERE");
        assert_eq!(read_script_string(script, 20).unwrap(), "TAIL");
    }

    #[test]
    fn empty_string_at_terminator() {
        let script = b"\0TEXT\0";
        assert_eq!(read_script_string(script, 0).unwrap(), "");
    }

    #[test]
    fn offset_past_end_is_an_error() {
        let script = b"AB\0";
        assert!(read_script_string(script, 4).is_err());
    }

    #[test]
    fn unterminated_string_runs_to_end() {
        let script = b"X\0TRAILING";
        assert_eq!(read_script_string(script, 2).unwrap(), "TRAILING");
    }
}
