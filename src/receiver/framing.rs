//! NOAAPort wire framing.
//!
//! Grounded in `original_source/src/nwws/receiver/weather_wire.py:
//! _convert_to_noaaport`: wrap the product text in SOH/ETX control bytes and
//! widen blank-line paragraph breaks to the doubled carriage-return line
//! ending NOAAPORT circuits use.

const SOH: char = '\u{01}';
const ETX: char = '\u{03}';

/// Frames `text` as a NOAAPORT product: `SOH`, body with `"\n\n"` widened to
/// `"\r\r\n"`, a guaranteed trailing `"\r\r\n"`, then `ETX`.
pub fn to_noaaport(text: &str) -> String {
    let mut body = text.replace("\n\n", "\r\r\n");
    if !body.ends_with("\r\r\n") {
        body.push_str("\r\r\n");
    }

    let mut framed = String::with_capacity(body.len() + 2);
    framed.push(SOH);
    framed.push_str(&body);
    framed.push(ETX);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_body_in_control_bytes_and_widens_blank_lines() {
        let framed = to_noaaport("line one\n\nline two\n");
        assert!(framed.starts_with(SOH));
        assert!(framed.ends_with(ETX));
        assert!(framed.contains("line one\r\r\nline two\n\r\r\n"));
    }

    #[test]
    fn does_not_duplicate_an_existing_trailing_terminator() {
        let framed = to_noaaport("already terminated\r\r\n");
        let etx_index = framed.len() - ETX.len_utf8();
        assert!(framed[..etx_index].ends_with("\r\r\n"));
        assert!(!framed[..etx_index].ends_with("\r\r\n\r\r\n"));
    }
}
