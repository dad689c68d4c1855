//! Main entry point for the formsplit CLI application.
//!
//! This binary splits a multipart/form-data body, read from a captured
//! request file or an HTTP URL, into its fields and uploaded files.

use anyhow::{Result, bail};
use clap::Parser;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use formsplit::{
    ByteSource, Cli, FileCleaner, FileItem, HttpBodySource, ItemFactory, LocalFileSource,
    MultipartConfig, MultipartError, MultipartReader,
};

/// Application entry point.
///
/// Parses command-line arguments, opens the body, and runs the parser on a
/// blocking task. Temp files left behind by any path are removed on exit.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.is_very_quiet() {
        "formsplit=error"
    } else {
        "formsplit=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = cli.config();
    let cleaner = FileCleaner::new();
    let factory = ItemFactory::with_cleaner(&config, cleaner.clone());

    let result = if cli.is_http_url() {
        // Remote body, streamed from the response
        let source = HttpBodySource::open(&cli.file).await?;
        let content_type = match cli
            .explicit_content_type()
            .or_else(|| source.content_type().map(str::to_string))
        {
            Some(content_type) => content_type,
            None => bail!("Response has no Content-Type; pass -t or -b"),
        };
        run_blocking(source, content_type, cli, config, factory).await
    } else {
        // Captured body on disk
        let mut source = LocalFileSource::open(Path::new(&cli.file))?;
        let content_type = match cli.explicit_content_type() {
            Some(content_type) => content_type,
            None => match source.sniff_boundary()? {
                Some(boundary) => format!(
                    "multipart/form-data; boundary={}",
                    String::from_utf8_lossy(&boundary)
                ),
                None => bail!("Could not detect the multipart boundary; pass -b or -t"),
            },
        };
        run_blocking(source, content_type, cli, config, factory).await
    };

    cleaner.shutdown();
    result
}

/// Run [`process_body`] off the async runtime; body sources block on reads.
async fn run_blocking<S: ByteSource + Send + 'static>(
    source: S,
    content_type: String,
    cli: Cli,
    config: MultipartConfig,
    factory: ItemFactory,
) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let bytes_read = process_body(source, &content_type, &cli, &config, &factory)?;
        if !cli.is_quiet() && cli.is_http_url() {
            eprintln!("\nTotal bytes read: {}", format_size(bytes_read));
        }
        Ok(())
    })
    .await?
}

/// Walk the parts of the body according to the CLI options.
///
/// - List mode (`-l` or `-v`): display the parts
/// - Pipe mode (`-p`): stream selected parts to stdout
/// - Extract mode: save uploaded files, print form field values
///
/// Returns the number of body bytes read.
fn process_body<S: ByteSource>(
    source: S,
    content_type: &str,
    cli: &Cli,
    config: &MultipartConfig,
    factory: &ItemFactory,
) -> Result<u64> {
    let mut reader = MultipartReader::from_content_type(source, content_type, config)?;
    let listing = cli.list || cli.verbose;

    if cli.verbose {
        println!(
            "{:>10}  {:<24}  {:<16}  File",
            "Length", "Type", "Field"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_size = 0u64;
    let mut part_count = 0usize;
    let show_markers = cli.fields.len() != 1 || has_glob_chars(&cli.fields[0]);

    while reader.has_next()? {
        let mut part = reader.next_part()?;
        let field = part.field_name().unwrap_or_default().to_string();
        if !is_selected(cli, &field) {
            continue;
        }

        let file_name = match part.file_name() {
            Ok(name) => name,
            Err(e) if !e.is_fatal() => {
                if !cli.is_very_quiet() {
                    eprintln!("Skipping: {} ({})", field, e);
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if listing {
            let size = part.skip()?;
            total_size += size;
            part_count += 1;
            if cli.verbose {
                println!(
                    "{:>10}  {:<24}  {:<16}  {}",
                    size,
                    part.content_type().unwrap_or("-"),
                    field,
                    file_name.as_deref().unwrap_or("")
                );
            } else {
                match &file_name {
                    Some(name) => println!("{}: {}", field, name),
                    None => println!("{}", field),
                }
            }
            continue;
        }

        if cli.pipe {
            let mut stdout = std::io::stdout().lock();
            if show_markers {
                writeln!(stdout, "--- {} ---", field)?;
            }
            if let Err(e) = std::io::copy(&mut part, &mut stdout) {
                match MultipartError::from(e) {
                    e @ MultipartError::FileSizeLimit { .. } => {
                        tracing::warn!("{}", e);
                    }
                    e => return Err(e.into()),
                }
            }
            if show_markers {
                writeln!(stdout)?;
            }
            continue;
        }

        let mut item = match factory.create_item(&mut part) {
            Ok(item) => item,
            Err(e @ MultipartError::FileSizeLimit { .. }) => {
                if !cli.is_very_quiet() {
                    eprintln!("Skipping: {} ({})", field, e);
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match &file_name {
            // Plain form field: show its value
            None => {
                if !cli.is_quiet() {
                    println!("  field: {} = {}", field, item.string()?);
                }
            }
            // Empty file input: nothing was uploaded
            Some(name) if name.is_empty() => {}
            Some(name) => save_file(&mut item, name, &field, cli)?,
        }
    }

    if cli.verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:<24}  {:<16}  {} parts",
            total_size, "", "", part_count
        );
    }

    Ok(reader.progress().bytes_read)
}

/// Check a field against the positional field list and the `-x` exclusions.
fn is_selected(cli: &Cli, field: &str) -> bool {
    if !cli.fields.is_empty()
        && !cli.fields.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, field)
            } else {
                f == field
            }
        })
    {
        return false;
    }

    !cli
        .exclude
        .iter()
        .any(|x| field.contains(x.as_str()) || glob_match(x, field))
}

/// Save an uploaded file.
///
/// Handles the extraction options:
/// - Custom output directory (`-d`)
/// - Junk paths (`-j`): keep only the base name of the uploaded file
/// - Overwrite control (`-n`, `-o`)
fn save_file(
    item: &mut FileItem,
    file_name: &str,
    field: &str,
    cli: &Cli,
) -> Result<()> {
    let Some(relative) = output_name(file_name, cli.junk_paths) else {
        if !cli.is_very_quiet() {
            eprintln!("Skipping: {} (unusable file name {:?})", field, file_name);
        }
        return Ok(());
    };

    let output_path = match &cli.extract_dir {
        Some(dir) => dir.join(&relative),
        None => relative,
    };

    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", output_path.display());
            }
            return Ok(());
        }

        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", output_path.display());
            }
            return Ok(());
        }
    }

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", output_path.display());
    }
    item.write_to(&output_path)?;

    Ok(())
}

/// Turn an uploaded file name into a relative output path.
///
/// Browsers may send full client paths with either separator; root, prefix
/// and `..` components are dropped so the result stays inside the output
/// directory. Returns `None` when nothing usable is left.
fn output_name(file_name: &str, junk_paths: bool) -> Option<PathBuf> {
    let normalized = file_name.replace('\\', "/");
    let components: Vec<&str> = Path::new(&normalized)
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();

    let path: PathBuf = if junk_paths {
        components.last().map(PathBuf::from)?
    } else {
        components.iter().collect()
    };

    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// ```ignore
/// assert!(glob_match("file*", "file1"));
/// assert!(glob_match("doc?", "docs"));
/// assert!(!glob_match("*.txt", "notes"));
/// ```
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero characters, or one more and stays
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("file*", "file1"));
        assert!(glob_match("doc?", "docs"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("*.txt", "notes"));
    }

    #[test]
    fn test_output_name_stays_relative() {
        assert_eq!(
            output_name("../../etc/passwd", false),
            Some(PathBuf::from("etc/passwd"))
        );
        assert_eq!(
            output_name("C:\\Users\\me\\photo.jpg", true),
            Some(PathBuf::from("photo.jpg"))
        );
        assert_eq!(
            output_name("/abs/dir/a.txt", false),
            Some(PathBuf::from("abs/dir/a.txt"))
        );
        assert_eq!(output_name("..", false), None);
        assert_eq!(output_name("", true), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }
}
