/// Subset of RFC 977 status codes this crate actually needs to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    PostingAllowed200,
    PostingNotAllowed201,
    BodyFollows222,
    ArticleExists223,
    AuthAcceptedNoPassRequired281,
    NoSuchArticle430,
    AuthContinue381,
    AuthRejected482,
    AuthRequired480,
    Other(u16),
}

impl StatusCode {
    fn from_u16(code: u16) -> Self {
        match code {
            200 => Self::PostingAllowed200,
            201 => Self::PostingNotAllowed201,
            222 => Self::BodyFollows222,
            223 => Self::ArticleExists223,
            281 => Self::AuthAcceptedNoPassRequired281,
            430 => Self::NoSuchArticle430,
            381 => Self::AuthContinue381,
            480 => Self::AuthRequired480,
            482 => Self::AuthRejected482,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub code: StatusCode,
    pub raw_code: u16,
    pub text: String,
}

impl Response {
    pub fn parse(line: &str) -> Option<Response> {
        let line = line.trim();
        let (code_str, rest) = line.split_once(' ').unwrap_or((line, ""));
        let raw_code: u16 = code_str.parse().ok()?;
        Some(Response {
            code: StatusCode::from_u16(raw_code),
            raw_code,
            text: rest.to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.raw_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stat_ok() {
        let r = Response::parse("223 0 <abc@example> article exists").unwrap();
        assert_eq!(r.code, StatusCode::ArticleExists223);
        assert!(r.is_success());
    }

    #[test]
    fn parses_missing_article() {
        let r = Response::parse("430 No Such Article").unwrap();
        assert_eq!(r.code, StatusCode::NoSuchArticle430);
        assert!(!r.is_success());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Response::parse("not a response").is_none());
    }
}
