//! Flat records, their table layout, and the extraction seam

/// One scraped entity as an ordered key→value list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or overwrite a field, keeping first-insertion order
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values in `columns` order; missing fields become empty strings
    pub fn row<'a>(&'a self, columns: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        columns.iter().map(|c| self.get(c).unwrap_or(""))
    }
}

/// Output table shape: column order, dedup key, optional date-like sort column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub columns: Vec<String>,
    pub primary_key: String,
    /// Sorted descending when present
    pub sort_key: Option<String>,
}

impl RecordLayout {
    pub fn new(columns: &[&str], primary_key: &str, sort_key: Option<&str>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            primary_key: primary_key.to_string(),
            sort_key: sort_key.map(String::from),
        }
    }
}

/// Page body could not be turned into records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractError(pub String);

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ExtractError {}

/// Site adapter: raw page body in, zero or more records out.
///
/// The fetch pipeline knows nothing about page layout beyond this.
pub trait Extract {
    fn extract(&self, body: &str) -> Result<Vec<Record>, ExtractError>;
}

impl<F> Extract for F
where
    F: Fn(&str) -> Result<Vec<Record>, ExtractError>,
{
    fn extract(&self, body: &str) -> Result<Vec<Record>, ExtractError> {
        self(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_in_place() {
        let mut r = Record::new().with("a", "1").with("b", "2");
        r.set("a", "3");
        let fields: Vec<_> = r.fields().collect();
        assert_eq!(fields, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn row_follows_columns() {
        let r = Record::new().with("url", "http://x.onion").with("extra", "ignored");
        let columns = vec!["description".to_string(), "url".to_string()];
        let row: Vec<_> = r.row(&columns).collect();
        assert_eq!(row, vec!["", "http://x.onion"]);
    }

    #[test]
    fn closure_is_an_extractor() {
        let extractor = |body: &str| -> Result<Vec<Record>, ExtractError> {
            Ok(body
                .lines()
                .map(|l| Record::new().with("line", l))
                .collect())
        };
        let records = extractor.extract("a\nb").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("line"), Some("b"));
    }
}
