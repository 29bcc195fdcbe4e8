//! NZB XML parser: builds an [`NzbTree`] from an nzb.org v1.1 document.
//!
//! Filename extraction mirrors the quoted-substring-first heuristic used
//! by the general-purpose Usenet downloader in the retrieval pack, with a
//! regex fallback over known archive/video extensions when no quoted
//! segment is present.

pub mod archive_sniffer;

use lazy_static::lazy_static;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;

use crate::models::{NzbFile, NzbSegment, NzbTree};

lazy_static! {
    static ref EXTENSION_RE: Regex = Regex::new(
        r#"(?i)[\w.\-\[\] ]+\.(mkv|mp4|mov|avi|ts|m4v|mpg|mpeg|wmv|flv|webm|rar|r\d{2,3}|7z|zip|par2)"#
    )
    .unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum NzbParseError {
    #[error("xml parse error: {0}")]
    Xml(String),
    #[error("nzb contains no files")]
    Empty,
}

pub fn parse_nzb(xml: &str) -> Result<NzbTree, NzbParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut tree = NzbTree::default();
    let mut buf = Vec::new();
    let mut in_meta_title = false;
    let mut current_file: Option<PendingFile> = None;
    let mut current_segment_number: Option<u32> = None;
    let mut text_buf = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "meta" => {
                        let is_title = e.attributes().flatten().any(|a| {
                            a.key.as_ref() == b"type"
                                && a.decode_and_unescape_value(reader.decoder()).map(|v| v == "title").unwrap_or(false)
                        });
                        in_meta_title = is_title;
                    }
                    "file" => {
                        let subject = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"subject")
                            .and_then(|a| a.decode_and_unescape_value(reader.decoder()).ok().map(|v| v.to_string()))
                            .unwrap_or_default();
                        current_file = Some(PendingFile { subject, segments: Vec::new() });
                    }
                    "segment" => {
                        current_segment_number = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"number")
                            .and_then(|a| a.decode_and_unescape_value(reader.decoder()).ok())
                            .and_then(|v| v.parse().ok());
                        let bytes = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"bytes")
                            .and_then(|a| a.decode_and_unescape_value(reader.decoder()).ok())
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0u64);
                        if let Some(file) = current_file.as_mut() {
                            file.pending_bytes = Some(bytes);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if in_meta_title {
                    tree.title = Some(e.unescape().unwrap_or_default().to_string());
                    in_meta_title = false;
                } else if current_segment_number.is_some() {
                    text_buf = e.unescape().unwrap_or_default().to_string();
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "segment" => {
                        if let (Some(number), Some(file)) = (current_segment_number.take(), current_file.as_mut()) {
                            let bytes = file.pending_bytes.take().unwrap_or(0);
                            file.segments.push(NzbSegment {
                                number,
                                bytes,
                                message_id: text_buf.trim().to_string(),
                            });
                        }
                        text_buf.clear();
                    }
                    "file" => {
                        if let Some(mut file) = current_file.take() {
                            file.segments.sort_by_key(|s| s.number);
                            tree.files.push(file.into_nzb_file());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(NzbParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if tree.files.is_empty() {
        return Err(NzbParseError::Empty);
    }
    Ok(tree)
}

struct PendingFile {
    subject: String,
    segments: Vec<NzbSegment>,
    pending_bytes: Option<u64>,
}

impl PendingFile {
    fn into_nzb_file(self) -> NzbFile {
        let filename = extract_filename(&self.subject);
        let extension = filename.as_ref().and_then(|f| f.rsplit('.').next().map(|e| e.to_lowercase()));
        NzbFile {
            subject: self.subject,
            filename,
            extension,
            segments: self.segments,
        }
    }
}

/// Quoted substring wins; otherwise a regex scan for a token ending in a
/// known archive/video extension.
fn extract_filename(subject: &str) -> Option<String> {
    if let Some(start) = subject.find('"') {
        if let Some(rel_end) = subject[start + 1..].find('"') {
            let candidate = &subject[start + 1..start + 1 + rel_end];
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }
    EXTENSION_RE.find(subject).map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="iso-8859-1"?>
    <!DOCTYPE nzb PUBLIC "-//newzBin//DTD NZB 1.1//EN" "http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd">
    <nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
      <head>
        <meta type="title">My Movie 2024</meta>
      </head>
      <file subject="My.Movie.2024 [01/02] - &quot;my.movie.2024.mkv&quot; yEnc (1/50)">
        <segments>
          <segment bytes="500000" number="2">part2@example.com</segment>
          <segment bytes="500000" number="1">part1@example.com</segment>
        </segments>
      </file>
    </nzb>"#;

    #[test]
    fn parses_title_and_sorts_segments() {
        let tree = parse_nzb(SAMPLE).unwrap();
        assert_eq!(tree.title.as_deref(), Some("My Movie 2024"));
        assert_eq!(tree.files.len(), 1);
        let segments = &tree.files[0].segments;
        assert_eq!(segments[0].number, 1);
        assert_eq!(segments[1].number, 2);
    }

    #[test]
    fn extracts_quoted_filename() {
        let tree = parse_nzb(SAMPLE).unwrap();
        assert_eq!(tree.files[0].filename.as_deref(), Some("my.movie.2024.mkv"));
        assert_eq!(tree.files[0].extension.as_deref(), Some("mkv"));
    }

    #[test]
    fn falls_back_to_extension_regex_without_quotes() {
        let subject = "file_without_quotes.part01.rar (1/20)";
        assert_eq!(extract_filename(subject).as_deref(), Some("file_without_quotes.part01.rar"));
    }

    #[test]
    fn empty_nzb_is_an_error() {
        let xml = r#"<?xml version="1.0"?><nzb></nzb>"#;
        assert!(matches!(parse_nzb(xml), Err(NzbParseError::Empty)));
    }
}
