use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use formsplit::{
    ByteSource, FileCleaner, ItemFactory, MultipartConfig, MultipartError, MultipartReader,
    ReaderSource, parse_request,
};

/// Hands out at most `step` bytes per read.
struct Trickle<'a> {
    data: &'a [u8],
    step: usize,
}

impl ByteSource for Trickle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.step.min(buf.len()).min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

fn encode(boundary: &str, parts: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut body = b"preamble text\r\n".to_vec();
    for (name, content) in parts {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.bin\"\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\nepilogue").as_bytes());
    body
}

/// Content that keeps brushing against the delimiter without matching it.
fn tricky_content(boundary: &str, seed: usize) -> Vec<u8> {
    let mut content = Vec::new();
    for i in 0..seed {
        match i % 4 {
            0 => content.extend_from_slice(b"\r\n--"),
            1 => content.extend_from_slice(&boundary.as_bytes()[..boundary.len() - 1]),
            2 => content.push(b'\r'),
            _ => content.extend_from_slice(&[i as u8; 3]),
        }
    }
    content
}

#[test]
fn dashed_boundary_body_yields_one_field() {
    let body = b"-----B\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nhello\r\n-----B--\r\n";
    let mut reader = MultipartReader::from_content_type(
        ReaderSource::new(&body[..]),
        "multipart/form-data; boundary=---B",
        &MultipartConfig::default(),
    )
    .unwrap();

    let mut part = reader.next_part().unwrap();
    assert_eq!(part.field_name(), Some("f"));
    let mut content = String::new();
    part.read_to_string(&mut content).unwrap();
    assert_eq!(content, "hello");
    assert!(!reader.has_next().unwrap());
}

#[test]
fn parts_survive_any_read_granularity() {
    let boundary = "----WebKitFormBoundary7MA4YWxk";
    let parts: Vec<(String, Vec<u8>)> = (0..6)
        .map(|i| (format!("part{i}"), tricky_content(boundary, i * 7)))
        .collect();
    let body = encode(boundary, &parts);

    for buffer_size in [boundary.len() + 5, 64, 4096] {
        for step in [1, 3, 17, 1024] {
            let config = MultipartConfig::default().buffer_size(buffer_size);
            let source = Trickle { data: &body, step };
            let mut reader =
                MultipartReader::new(source, boundary.as_bytes(), &config).unwrap();

            let mut seen = Vec::new();
            while reader.has_next().unwrap() {
                let mut part = reader.next_part().unwrap();
                let mut content = Vec::new();
                part.read_to_end(&mut content).unwrap();
                seen.push((part.field_name().unwrap().to_string(), content));
            }
            assert_eq!(seen, parts, "buffer {buffer_size}, step {step}");
        }
    }
}

#[test]
fn skipping_and_draining_see_the_same_headers() {
    let boundary = "xyzzy";
    let parts: Vec<(String, Vec<u8>)> = (0..4)
        .map(|i| (format!("f{i}"), tricky_content(boundary, 40 + i)))
        .collect();
    let body = encode(boundary, &parts);
    let config = MultipartConfig::default().buffer_size(16);

    let collect = |drain: bool| {
        let mut reader =
            MultipartReader::new(ReaderSource::new(&body[..]), boundary.as_bytes(), &config)
                .unwrap();
        let mut headers = Vec::new();
        while reader.has_next().unwrap() {
            let mut part = reader.next_part().unwrap();
            if drain {
                io::copy(&mut part, &mut io::sink()).unwrap();
            }
            headers.push(part.headers().clone());
        }
        headers
    };

    let drained = collect(true);
    assert_eq!(drained.len(), 4);
    assert_eq!(drained, collect(false));
}

#[test]
fn items_at_and_over_threshold_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let threshold = 1000;
    let config = MultipartConfig::default()
        .memory_threshold(threshold)
        .buffer_size(128)
        .repository(dir.path());
    let factory = ItemFactory::new(&config);

    let at: Vec<u8> = (0..threshold).map(|i| (i % 251) as u8).collect();
    let over: Vec<u8> = (0..=threshold).map(|i| (i % 241) as u8).collect();
    let parts = vec![("at".to_string(), at.clone()), ("over".to_string(), over.clone())];
    let body = encode("b0undary", &parts);

    let items = parse_request(
        ReaderSource::new(&body[..]),
        "multipart/form-data; boundary=b0undary",
        &config,
        &factory,
    )
    .unwrap();

    assert!(items[0].is_in_memory());
    assert_eq!(items[0].get().unwrap(), at);
    assert!(!items[1].is_in_memory());
    assert_eq!(items[1].size(), over.len() as u64);
    assert_eq!(items[1].get().unwrap(), over);
    assert_eq!(factory.cleaner().tracked_count(), 1);
}

#[test]
fn cleaner_shutdown_removes_leaked_items() {
    let dir = tempfile::tempdir().unwrap();
    let config = MultipartConfig::default()
        .memory_threshold(8)
        .repository(dir.path());
    let cleaner = FileCleaner::new();
    let factory = ItemFactory::with_cleaner(&config, cleaner.clone());

    let parts: Vec<(String, Vec<u8>)> = (0..3)
        .map(|i| (format!("f{i}"), vec![b'x'; 64]))
        .collect();
    let body = encode("sep", &parts);
    let items = parse_request(
        ReaderSource::new(&body[..]),
        "multipart/form-data; boundary=sep",
        &config,
        &factory,
    )
    .unwrap();

    let paths: Vec<_> = items
        .iter()
        .map(|item| item.store_location().unwrap().to_path_buf())
        .collect();
    assert!(paths.iter().all(|p| p.exists()));
    assert_eq!(cleaner.tracked_count(), 3);

    // Leak the items, then shut down.
    std::mem::forget(items);
    assert_eq!(cleaner.shutdown(), 3);
    assert!(paths.iter().all(|p| !p.exists()));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn progress_reports_are_ordered() {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let config = MultipartConfig::default()
        .buffer_size(32)
        .progress(move |bytes: u64, length: Option<u64>, items: usize| {
            sink.lock().unwrap().push((bytes, length, items));
        });

    let parts: Vec<(String, Vec<u8>)> = (0..5)
        .map(|i| (format!("f{i}"), vec![b'a' + i as u8; 100]))
        .collect();
    let body = encode("sep", &parts);
    let mut reader =
        MultipartReader::new(Trickle { data: &body, step: 7 }, b"sep", &config).unwrap();
    while reader.has_next().unwrap() {
        let mut part = reader.next_part().unwrap();
        io::copy(&mut part, &mut io::sink()).unwrap();
    }

    let updates = updates.lock().unwrap();
    assert!(updates.len() > 10);
    assert!(
        updates
            .windows(2)
            .all(|w| w[0].0 <= w[1].0 && w[0].2 <= w[1].2)
    );
    assert!(updates.iter().all(|&(_, length, _)| length.is_none()));
    assert_eq!(updates.last().unwrap().2, 5);
    assert_eq!(reader.progress().items, 5);
}

#[test]
fn request_limit_stops_parse_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = MultipartConfig::default()
        .memory_threshold(16)
        .buffer_size(64)
        .max_request_size(Some(300))
        .repository(dir.path());
    let factory = ItemFactory::new(&config);

    let parts: Vec<(String, Vec<u8>)> = (0..4)
        .map(|i| (format!("f{i}"), vec![b'q'; 120]))
        .collect();
    let body = encode("sep", &parts);

    let result = parse_request(
        ReaderSource::new(&body[..]),
        "multipart/form-data; boundary=sep",
        &config,
        &factory,
    );
    match result {
        Err(MultipartError::RequestSizeLimit { limit, actual }) => {
            assert_eq!(limit, 300);
            assert!(actual > 300);
        }
        other => panic!("unexpected result: {:?}", other.map(|items| items.len())),
    }
    assert_eq!(factory.cleaner().tracked_count(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn file_size_limit_skips_only_the_offending_part() {
    let config = MultipartConfig::default()
        .buffer_size(32)
        .max_file_size(Some(50));
    let parts = vec![
        ("small".to_string(), vec![b's'; 10]),
        ("large".to_string(), vec![b'l'; 500]),
        ("after".to_string(), vec![b'a'; 20]),
    ];
    let body = encode("sep", &parts);
    let mut reader = MultipartReader::new(ReaderSource::new(&body[..]), b"sep", &config).unwrap();

    let mut outcomes = Vec::new();
    while reader.has_next().unwrap() {
        let mut part = reader.next_part().unwrap();
        let mut content = Vec::new();
        let outcome = match part.read_to_end(&mut content) {
            Ok(n) => Ok(n),
            Err(e) => Err(MultipartError::from(e)),
        };
        outcomes.push((part.field_name().unwrap().to_string(), outcome));
    }

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0].1, Ok(10)));
    assert!(matches!(
        outcomes[1].1,
        Err(MultipartError::FileSizeLimit { actual: 500, limit: 50, .. })
    ));
    assert_eq!(outcomes[2].0, "after");
    assert!(matches!(outcomes[2].1, Ok(20)));
}

#[test]
fn transport_errors_are_not_malformed_streams() {
    struct Failing;
    impl ByteSource for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "peer went away"))
        }
    }

    let mut reader = MultipartReader::new(Failing, b"sep", &MultipartConfig::default()).unwrap();
    match reader.has_next() {
        Err(MultipartError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionAborted),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(
        reader.has_next(),
        Err(MultipartError::SessionAborted)
    ));
}

#[test]
fn boundary_too_long_for_buffer_is_rejected() {
    let config = MultipartConfig::default().buffer_size(10);
    let result = MultipartReader::new(ReaderSource::new(&b""[..]), b"123456", &config);
    assert!(matches!(result, Err(MultipartError::InvalidConfig(_))));
}
