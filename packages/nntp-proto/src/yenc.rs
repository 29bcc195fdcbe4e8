use thiserror::Error;

#[derive(Error, Debug)]
pub enum YencError {
    #[error("no =ybegin line found")]
    MissingYbegin,
    #[error("decoded zero bytes")]
    EmptyDecode,
    #[error("output exceeded max_bytes ({0})")]
    OutputTooLarge(usize),
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    LookingForYbegin,
    Decoding,
    Done,
}

/// Decodes a yEnc-encoded article body, bounded by `max_bytes` of output.
///
/// State machine: scan lines for `=ybegin`, then decode payload lines until
/// an `=yend` line or input exhaustion. Critical-escaped bytes (`=` prefix)
/// are unescaped by subtracting 64 after removing the standard yEnc offset.
pub fn decode_yenc(input: &[u8], max_bytes: usize) -> Result<Vec<u8>, YencError> {
    let mut state = State::LookingForYbegin;
    let mut out = Vec::new();

    for line in input.split(|&b| b == b'\n') {
        let line = strip_cr(line);
        match state {
            State::LookingForYbegin => {
                if line.starts_with(b"=ybegin") {
                    state = State::Decoding;
                }
                continue;
            }
            State::Decoding => {
                if line.starts_with(b"=ypart") {
                    continue;
                }
                if line.starts_with(b"=yend") {
                    state = State::Done;
                    break;
                }
                decode_line(line, &mut out)?;
                if out.len() > max_bytes {
                    return Err(YencError::OutputTooLarge(max_bytes));
                }
            }
            State::Done => break,
        }
    }

    if state == State::LookingForYbegin {
        return Err(YencError::MissingYbegin);
    }
    if out.is_empty() {
        return Err(YencError::EmptyDecode);
    }
    Ok(out)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn decode_line(line: &[u8], out: &mut Vec<u8>) -> Result<(), YencError> {
    let mut escaped = false;
    for &byte in line {
        if escaped {
            out.push(byte.wrapping_sub(64).wrapping_sub(42));
            escaped = false;
            continue;
        }
        if byte == b'=' {
            escaped = true;
            continue;
        }
        out.push(byte.wrapping_sub(42));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_header() {
        let err = decode_yenc(b"just some text\n", 1024).unwrap_err();
        assert!(matches!(err, YencError::MissingYbegin));
    }

    #[test]
    fn decodes_simple_payload() {
        // raw byte 0x00 encodes as 0x00 + 42 = 0x2a = '*'
        let input = b"=ybegin line=128 size=1 name=test.bin\r\n*\r\n=yend size=1\r\n";
        let out = decode_yenc(input, 1024).unwrap();
        assert_eq!(out, vec![0u8]);
    }

    #[test]
    fn enforces_max_bytes() {
        let mut body = b"=ybegin line=128 size=4 name=t.bin\r\n".to_vec();
        body.extend(std::iter::repeat(b'*').take(4096));
        body.extend_from_slice(b"\r\n=yend size=4096\r\n");
        let err = decode_yenc(&body, 1024).unwrap_err();
        assert!(matches!(err, YencError::OutputTooLarge(1024)));
    }
}
