//! One-call parsing of a whole request into items.

use std::collections::HashMap;

use crate::io::ByteSource;
use crate::multipart::{MultipartConfig, MultipartReader, Result};
use crate::store::{FileItem, ItemFactory};

/// Parse every part of a request body into a [`FileItem`], in order.
///
/// # Errors
///
/// Any error aborts the parse. Items created up to that point are dropped,
/// which deletes their temp files.
pub fn parse_request<S: ByteSource>(
    source: S,
    content_type: &str,
    config: &MultipartConfig,
    factory: &ItemFactory,
) -> Result<Vec<FileItem>> {
    let mut reader = MultipartReader::from_content_type(source, content_type, config)?;
    let mut items = Vec::new();

    while reader.has_next()? {
        let mut part = reader.next_part()?;
        items.push(factory.create_item(&mut part)?);
    }

    tracing::debug!(
        items = items.len(),
        bytes = reader.progress().bytes_read,
        "parsed multipart request"
    );
    Ok(items)
}

/// Like [`parse_request`], grouped by field name.
///
/// Parts without a field name are collected under the empty string.
pub fn parse_parameter_map<S: ByteSource>(
    source: S,
    content_type: &str,
    config: &MultipartConfig,
    factory: &ItemFactory,
) -> Result<HashMap<String, Vec<FileItem>>> {
    let mut map: HashMap<String, Vec<FileItem>> = HashMap::new();
    for item in parse_request(source, content_type, config, factory)? {
        let key = item.field_name().unwrap_or_default().to_string();
        map.entry(key).or_default().push(item);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ReaderSource;
    use crate::multipart::MultipartError;

    const CONTENT_TYPE: &str = "multipart/form-data; boundary=AaB03x";

    fn body() -> Vec<u8> {
        b"--AaB03x\r\n\
Content-Disposition: form-data; name=\"submit-name\"\r\n\r\n\
Larry\r\n\
--AaB03x\r\n\
Content-Disposition: form-data; name=\"files\"; filename=\"file1.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
... contents of file1.txt ...\r\n\
--AaB03x\r\n\
Content-Disposition: form-data; name=\"files\"; filename=\"file2.gif\"\r\n\
Content-Type: image/gif\r\n\r\n\
GIF89a...\r\n\
--AaB03x--\r\n"
            .to_vec()
    }

    #[test]
    fn test_parse_request_collects_items_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = MultipartConfig::default().repository(dir.path());
        let factory = ItemFactory::new(&config);
        let body = body();

        let items =
            parse_request(ReaderSource::new(&body[..]), CONTENT_TYPE, &config, &factory).unwrap();
        let names: Vec<_> = items.iter().map(|i| i.field_name().unwrap()).collect();
        assert_eq!(names, ["submit-name", "files", "files"]);
        assert!(items[0].is_form_field());
        assert_eq!(items[0].string().unwrap(), "Larry");
        assert_eq!(items[2].content_type(), Some("image/gif"));
        assert_eq!(items[2].get().unwrap(), b"GIF89a...");
    }

    #[test]
    fn test_parameter_map_groups_by_field() {
        let dir = tempfile::tempdir().unwrap();
        let config = MultipartConfig::default().repository(dir.path());
        let factory = ItemFactory::new(&config);
        let body = body();

        let map = parse_parameter_map(ReaderSource::new(&body[..]), CONTENT_TYPE, &config, &factory)
            .unwrap();
        assert_eq!(map.len(), 2);
        let files: Vec<_> = map["files"].iter().map(|i| i.file_name().unwrap()).collect();
        assert_eq!(files, ["file1.txt", "file2.gif"]);
    }

    #[test]
    fn test_failed_parse_deletes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = MultipartConfig::default()
            .memory_threshold(4)
            .repository(dir.path());
        let factory = ItemFactory::new(&config);
        let mut body = body();
        body.truncate(body.len() - 12);

        let result = parse_request(ReaderSource::new(&body[..]), CONTENT_TYPE, &config, &factory);
        assert!(matches!(result, Err(MultipartError::MalformedStream(_))));
        assert_eq!(factory.cleaner().tracked_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
