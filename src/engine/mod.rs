use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value as _, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};

use crate::error::{BrightError, Result};
use crate::models::Document;

/// Page size used when resolving a filter to concrete document ids
const DELETE_PAGE_SIZE: usize = 10_000;

/// Hits examined when sorting on document fields. Score-ordered searches
/// paginate natively; field sorts need the window because dynamic JSON
/// attributes carry no fast fields.
const SORT_WINDOW: usize = 10_000;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// A scored search hit
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub score: f32,
    pub document: Document,
}

/// Result page of a search
#[derive(Clone, Debug)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

/// One on-disk inverted index, owned end-to-end by the engine.
///
/// Schema: `_id` holds the coerced primary-key value (raw token, stored),
/// `_source` the full JSON payload (stored only), `doc` the indexed dynamic
/// JSON object with excluded attributes stripped.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    excluded: RwLock<HashSet<String>>,
    id_field: Field,
    source_field: Field,
    doc_field: Field,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("_id", STRING | STORED);
    builder.add_text_field("_source", STORED);
    builder.add_json_field("doc", TEXT);
    builder.build()
}

impl SearchIndex {
    /// Create a fresh index directory
    pub fn create(path: &Path, exclude_attributes: &[String]) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let index = Index::create_in_dir(path, build_schema())?;
        Self::from_index(index, exclude_attributes)
    }

    /// Open an existing index directory
    pub fn open(path: &Path, exclude_attributes: &[String]) -> Result<Self> {
        let index = Index::open_in_dir(path)?;
        Self::from_index(index, exclude_attributes)
    }

    fn from_index(index: Index, exclude_attributes: &[String]) -> Result<Self> {
        let schema = index.schema();
        let id_field = schema
            .get_field("_id")
            .map_err(|e| BrightError::Internal(format!("index schema missing _id: {}", e)))?;
        let source_field = schema
            .get_field("_source")
            .map_err(|e| BrightError::Internal(format!("index schema missing _source: {}", e)))?;
        let doc_field = schema
            .get_field("doc")
            .map_err(|e| BrightError::Internal(format!("index schema missing doc: {}", e)))?;

        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            excluded: RwLock::new(exclude_attributes.iter().cloned().collect()),
            id_field,
            source_field,
            doc_field,
        })
    }

    /// Replace the set of attributes excluded from tokenization. Applies to
    /// documents indexed after the call; existing postings are untouched.
    pub fn set_excluded_attributes(&self, exclude_attributes: &[String]) {
        *self.excluded.write() = exclude_attributes.iter().cloned().collect();
    }

    /// Upsert a batch of documents in one commit. Each entry pairs the
    /// engine-level id with the full document payload.
    pub fn upsert_batch(&self, documents: &[(String, Document)]) -> Result<()> {
        let excluded = self.excluded.read().clone();
        let mut writer = self.writer.lock();

        for (id, document) in documents {
            writer.delete_term(Term::from_field_text(self.id_field, id));

            let mut indexed = document.clone();
            for attr in &excluded {
                indexed.remove(attr);
            }

            let payload = serde_json::json!({
                "_id": id,
                "_source": serde_json::to_string(document)?,
                "doc": Value::Object(indexed),
            });

            let tdoc = TantivyDocument::parse_json(&self.index.schema(), &payload.to_string())
                .map_err(|e| BrightError::Internal(format!("failed to build document: {}", e)))?;
            writer.add_document(tdoc)?;
        }

        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Delete documents by engine-level id in one commit. Missing ids are
    /// not an error.
    pub fn delete_ids(&self, ids: &[String]) -> Result<()> {
        let mut writer = self.writer.lock();
        for id in ids {
            writer.delete_term(Term::from_field_text(self.id_field, id));
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Resolve a query-string filter to ids page by page, then delete them
    /// in one commit. Returns the number of ids deleted.
    pub fn delete_matching(&self, filter: &str) -> Result<usize> {
        let query = self.parse_query(filter)?;
        let searcher = self.reader.searcher();

        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let page = searcher.search(
                &*query,
                &TopDocs::with_limit(DELETE_PAGE_SIZE).and_offset(offset),
            )?;
            let page_len = page.len();

            for (_score, addr) in page {
                let doc: TantivyDocument = searcher.doc(addr)?;
                if let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) {
                    ids.push(id.to_string());
                }
            }

            if page_len < DELETE_PAGE_SIZE {
                break;
            }
            offset += DELETE_PAGE_SIZE;
        }

        let deleted = ids.len();
        self.delete_ids(&ids)?;
        Ok(deleted)
    }

    /// Fetch a document by engine-level id
    pub fn get_by_id(&self, id: &str) -> Result<Option<Document>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.id_field, id),
            IndexRecordOption::Basic,
        );

        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_score, addr)) = top.into_iter().next() else {
            return Ok(None);
        };

        let doc: TantivyDocument = searcher.doc(addr)?;
        Ok(Some(self.decode_source(&doc)?))
    }

    /// Query-string search. An empty query matches all documents. `limit`
    /// of zero returns no hits but still reports the total.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
        sort: &[String],
    ) -> Result<SearchResults> {
        let query = self.parse_query(query_str)?;
        let searcher = self.reader.searcher();

        if limit == 0 {
            let total = searcher.search(&*query, &Count)?;
            return Ok(SearchResults {
                hits: Vec::new(),
                total: total as u64,
            });
        }

        if is_score_descending(sort) {
            let (top, total) = searcher.search(
                &*query,
                &(TopDocs::with_limit(limit).and_offset(offset), Count),
            )?;

            let mut hits = Vec::with_capacity(top.len());
            for (score, addr) in top {
                let doc: TantivyDocument = searcher.doc(addr)?;
                hits.push(SearchHit {
                    score,
                    document: self.decode_source(&doc)?,
                });
            }

            return Ok(SearchResults {
                hits,
                total: total as u64,
            });
        }

        // Field sort: rank a bounded window, order it, then page.
        let (top, total) =
            searcher.search(&*query, &(TopDocs::with_limit(SORT_WINDOW), Count))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, addr) in top {
            let doc: TantivyDocument = searcher.doc(addr)?;
            hits.push(SearchHit {
                score,
                document: self.decode_source(&doc)?,
            });
        }

        sort_hits(&mut hits, sort);

        let hits = hits
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect::<Vec<_>>();

        Ok(SearchResults {
            hits,
            total: total as u64,
        })
    }

    /// Number of live documents in the index
    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn parse_query(&self, query_str: &str) -> Result<Box<dyn Query>> {
        if query_str.trim().is_empty() {
            return Ok(Box::new(AllQuery));
        }

        let parser = QueryParser::for_index(&self.index, vec![self.doc_field]);
        parser
            .parse_query(query_str)
            .map_err(|e| BrightError::QueryParse(e.to_string()))
    }

    fn decode_source(&self, doc: &TantivyDocument) -> Result<Document> {
        match doc.get_first(self.source_field).and_then(|v| v.as_str()) {
            Some(source) => Ok(serde_json::from_str(source)?),
            None => Err(BrightError::Internal(
                "stored document has no _source field".to_string(),
            )),
        }
    }
}

fn is_score_descending(sort: &[String]) -> bool {
    match sort {
        [] => true,
        [single] => single.trim() == "-_score",
        _ => false,
    }
}

fn sort_hits(hits: &mut [SearchHit], sort: &[String]) {
    let keys: Vec<(&str, bool)> = sort
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('-') {
            Some(field) => (field, true),
            None => (s, false),
        })
        .collect();

    hits.sort_by(|a, b| {
        for (field, descending) in &keys {
            let ordering = if *field == "_score" {
                a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal)
            } else {
                compare_values(a.document.get(*field), b.document.get(*field))
            };
            let ordering = if *descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Total order over JSON values for sorting: numbers, then strings, then
/// booleans; null and missing attributes sort last in either direction.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            Some(Value::Number(_)) => 0,
            Some(Value::String(_)) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 3,
            Some(Value::Null) | None => 4,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn sample_index(dir: &TempDir) -> SearchIndex {
        let index = SearchIndex::create(dir.path(), &[]).unwrap();
        index
            .upsert_batch(&[
                (
                    "1".to_string(),
                    doc(&[
                        ("isbn", "1".into()),
                        ("title", "The C Programming Language".into()),
                        ("year", 1978.into()),
                    ]),
                ),
                (
                    "2".to_string(),
                    doc(&[
                        ("isbn", "2".into()),
                        ("title", "The Rust Programming Language".into()),
                        ("year", 2019.into()),
                    ]),
                ),
                (
                    "3".to_string(),
                    doc(&[
                        ("isbn", "3".into()),
                        ("title", "Unrelated cookbook".into()),
                        ("year", 2001.into()),
                    ]),
                ),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_upsert_and_search() {
        let dir = TempDir::new().unwrap();
        let index = sample_index(&dir);

        let results = index.search("Programming", 10, 0, &[]).unwrap();
        assert_eq!(results.total, 2);
        assert!(results.hits.iter().all(|h| h.document["title"]
            .as_str()
            .unwrap()
            .contains("Programming")));
    }

    #[test]
    fn test_empty_query_matches_all() {
        let dir = TempDir::new().unwrap();
        let index = sample_index(&dir);

        let results = index.search("", 10, 0, &[]).unwrap();
        assert_eq!(results.total, 3);
        assert_eq!(results.hits.len(), 3);
    }

    #[test]
    fn test_limit_zero_reports_total() {
        let dir = TempDir::new().unwrap();
        let index = sample_index(&dir);

        let results = index.search("", 0, 0, &[]).unwrap();
        assert!(results.hits.is_empty());
        assert_eq!(results.total, 3);
    }

    #[test]
    fn test_upsert_same_id_replaces() {
        let dir = TempDir::new().unwrap();
        let index = sample_index(&dir);

        index
            .upsert_batch(&[(
                "1".to_string(),
                doc(&[("isbn", "1".into()), ("title", "K&R".into())]),
            )])
            .unwrap();

        assert_eq!(index.doc_count(), 3);
        let fetched = index.get_by_id("1").unwrap().unwrap();
        assert_eq!(fetched["title"], "K&R");
    }

    #[test]
    fn test_delete_ids_and_missing_id_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let index = sample_index(&dir);

        index
            .delete_ids(&["2".to_string(), "nope".to_string()])
            .unwrap();
        assert_eq!(index.doc_count(), 2);
        assert!(index.get_by_id("2").unwrap().is_none());
    }

    #[test]
    fn test_delete_matching_filter() {
        let dir = TempDir::new().unwrap();
        let index = sample_index(&dir);

        let deleted = index.delete_matching("Programming").unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(index.doc_count(), 1);
    }

    #[test]
    fn test_field_sort_ascending_and_descending() {
        let dir = TempDir::new().unwrap();
        let index = sample_index(&dir);

        let asc = index.search("", 10, 0, &["year".to_string()]).unwrap();
        let years: Vec<i64> = asc
            .hits
            .iter()
            .map(|h| h.document["year"].as_i64().unwrap())
            .collect();
        assert_eq!(years, vec![1978, 2001, 2019]);

        let desc = index.search("", 10, 0, &["-year".to_string()]).unwrap();
        let years: Vec<i64> = desc
            .hits
            .iter()
            .map(|h| h.document["year"].as_i64().unwrap())
            .collect();
        assert_eq!(years, vec![2019, 2001, 1978]);
    }

    #[test]
    fn test_excluded_attribute_not_searchable_but_stored() {
        let dir = TempDir::new().unwrap();
        let index = SearchIndex::create(dir.path(), &["secret".to_string()]).unwrap();
        index
            .upsert_batch(&[(
                "1".to_string(),
                doc(&[("id", "1".into()), ("secret", "xyzzy".into())]),
            )])
            .unwrap();

        let results = index.search("xyzzy", 10, 0, &[]).unwrap();
        assert_eq!(results.total, 0);

        let fetched = index.get_by_id("1").unwrap().unwrap();
        assert_eq!(fetched["secret"], "xyzzy");
    }

    #[test]
    fn test_reopen_preserves_documents() {
        let dir = TempDir::new().unwrap();
        {
            let index = sample_index(&dir);
            assert_eq!(index.doc_count(), 3);
        }

        let reopened = SearchIndex::open(dir.path(), &[]).unwrap();
        assert_eq!(reopened.doc_count(), 3);
        assert!(reopened.get_by_id("1").unwrap().is_some());
    }

    #[test]
    fn test_compare_values_orders_missing_last() {
        assert_eq!(
            compare_values(Some(&Value::from(1)), Some(&Value::from(2))),
            Ordering::Less
        );
        assert_eq!(compare_values(Some(&Value::from(1)), None), Ordering::Less);
        assert_eq!(compare_values(None, Some(&Value::from("a"))), Ordering::Greater);
    }
}
