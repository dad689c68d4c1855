use clap::Parser;
use std::path::PathBuf;

use crate::multipart::{
    DEFAULT_BUFFER_SIZE, DEFAULT_MAX_HEADER_SIZE, DEFAULT_MEMORY_THRESHOLD, MultipartConfig,
};

#[derive(Parser, Debug)]
#[command(name = "formsplit")]
#[command(version)]
#[command(about = "Split a multipart/form-data request body into its fields and files", long_about = None)]
#[command(after_help = "Examples:\n  \
  formsplit body.bin -d uploads        save every uploaded file into uploads/\n  \
  formsplit -p body.bin comment        print the value of the comment field\n  \
  formsplit -l https://example.com/form   list the parts of a remote multipart response")]
pub struct Cli {
    /// Captured request body (optionally .gz) or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Fields to extract (default: all)
    #[arg(value_name = "FIELDS")]
    pub fields: Vec<String>,

    /// List parts (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List parts verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write part contents to stdout, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Exclude fields that follow
    #[arg(short = 'x', value_name = "FIELD", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (ignore directories in uploaded file names)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Content-Type of the body (default: sniffed from the first line)
    #[arg(short = 't', long = "content-type", value_name = "TYPE")]
    pub content_type: Option<String>,

    /// Boundary of the body, without the leading "--"
    #[arg(short = 'b', long = "boundary", value_name = "BOUNDARY", conflicts_with = "content_type")]
    pub boundary: Option<String>,

    /// Abort once the body exceeds this many bytes
    #[arg(long, value_name = "BYTES")]
    pub max_request_size: Option<u64>,

    /// Skip parts larger than this many bytes
    #[arg(long, value_name = "BYTES")]
    pub max_file_size: Option<u64>,

    /// Abort on a header block larger than this many bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_HEADER_SIZE)]
    pub max_header_size: usize,

    /// Abort after this many parts
    #[arg(long, value_name = "COUNT")]
    pub max_parts: Option<usize>,

    /// Parts larger than this are staged in a temp file
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MEMORY_THRESHOLD)]
    pub threshold: usize,

    /// Directory for temp files
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Read-ahead buffer size
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Parser settings selected by the flags
    pub fn config(&self) -> MultipartConfig {
        let config = MultipartConfig::new()
            .buffer_size(self.buffer_size)
            .memory_threshold(self.threshold)
            .max_request_size(self.max_request_size)
            .max_file_size(self.max_file_size)
            .max_header_size(self.max_header_size)
            .max_parts(self.max_parts);

        match &self.temp_dir {
            Some(dir) => config.repository(dir),
            None => config,
        }
    }

    /// Content type given with `-t`, or built from `-b`
    pub fn explicit_content_type(&self) -> Option<String> {
        match (&self.content_type, &self.boundary) {
            (Some(content_type), _) => Some(content_type.clone()),
            (None, Some(boundary)) => Some(format!("multipart/form-data; boundary={boundary}")),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_flags_map_onto_config() {
        let cli = Cli::parse_from([
            "formsplit",
            "body.bin",
            "--max-file-size",
            "1000",
            "--threshold",
            "64",
            "--temp-dir",
            "/var/tmp",
        ]);
        let config = cli.config();
        assert_eq!(config.get_max_file_size(), Some(1000));
        assert_eq!(config.get_max_request_size(), None);
        assert_eq!(config.get_memory_threshold(), 64);
        assert_eq!(config.get_buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(config.get_repository(), Path::new("/var/tmp"));
    }

    #[test]
    fn test_content_type_sources() {
        let cli = Cli::parse_from(["formsplit", "-b", "xyz", "body.bin"]);
        assert_eq!(
            cli.explicit_content_type().as_deref(),
            Some("multipart/form-data; boundary=xyz")
        );

        let cli = Cli::parse_from(["formsplit", "body.bin"]);
        assert_eq!(cli.explicit_content_type(), None);

        assert!(Cli::try_parse_from(["formsplit", "-b", "x", "-t", "multipart/mixed", "f"]).is_err());
    }

    #[test]
    fn test_url_and_quiet_modes() {
        let cli = Cli::parse_from(["formsplit", "-p", "https://example.com/form"]);
        assert!(cli.is_http_url());
        assert!(cli.is_quiet());
        assert!(!cli.is_very_quiet());
    }
}
