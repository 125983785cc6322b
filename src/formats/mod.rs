use crate::error::{BrightError, Result};
use crate::models::Document;

/// Parser for one of the supported document input formats
pub trait DocumentParser: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<Vec<Document>>;
}

/// Look up the parser for a `format` query parameter value
pub fn parser_for(format: &str) -> Result<Box<dyn DocumentParser>> {
    match format {
        "jsoneachrow" => Ok(Box::new(JsonEachRow)),
        "msgpack" => Ok(Box::new(MsgPack)),
        other => Err(BrightError::UnsupportedFormat(other.to_string())),
    }
}

/// One JSON object per line; blank lines are skipped
pub struct JsonEachRow;

impl DocumentParser for JsonEachRow {
    fn parse(&self, data: &[u8]) -> Result<Vec<Document>> {
        let text = std::str::from_utf8(data).map_err(|e| BrightError::ParseLine {
            line: 0,
            message: format!("input is not valid UTF-8: {}", e),
        })?;

        let mut documents = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let doc: Document =
                serde_json::from_str(line).map_err(|e| BrightError::ParseLine {
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            documents.push(doc);
        }

        Ok(documents)
    }
}

/// A single MessagePack array of maps
pub struct MsgPack;

impl DocumentParser for MsgPack {
    fn parse(&self, data: &[u8]) -> Result<Vec<Document>> {
        rmp_serde::from_slice(data).map_err(|e| BrightError::ParseMsgpack(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsoneachrow_skips_blank_lines() {
        let input = b"{\"id\":\"1\",\"title\":\"a\"}\n\n{\"id\":\"2\",\"title\":\"b\"}\n";
        let docs = JsonEachRow.parse(input).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["id"], "2");
    }

    #[test]
    fn test_jsoneachrow_reports_line_number() {
        let input = b"{\"id\":\"1\"}\nnot json\n";
        let err = JsonEachRow.parse(input).unwrap_err();
        assert!(err.to_string().contains("line 2"), "got: {}", err);
    }

    #[test]
    fn test_msgpack_array_of_maps() {
        let mut doc = Document::new();
        doc.insert("id".to_string(), serde_json::json!("1"));
        doc.insert("count".to_string(), serde_json::json!(3));

        let bytes = rmp_serde::to_vec(&vec![doc.clone()]).unwrap();
        let docs = MsgPack.parse(&bytes).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0], doc);
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            parser_for("csv"),
            Err(BrightError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parse_format_roundtrip_both_formats() {
        let mut doc = Document::new();
        doc.insert("userId".to_string(), serde_json::json!("u1"));
        doc.insert("active".to_string(), serde_json::json!(true));

        let json_line = serde_json::to_string(&doc).unwrap();
        let parsed = parser_for("jsoneachrow")
            .unwrap()
            .parse(json_line.as_bytes())
            .unwrap();
        assert_eq!(parsed[0], doc);

        let packed = rmp_serde::to_vec(&vec![doc.clone()]).unwrap();
        let parsed = parser_for("msgpack").unwrap().parse(&packed).unwrap();
        assert_eq!(parsed[0], doc);
    }
}
