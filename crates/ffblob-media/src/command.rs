//! FFmpeg directive vetting and command building.
//!
//! A directive is the caller-supplied fragment of FFmpeg flags and filters.
//! It is tokenized with shell-like quoting, vetted against a set of rules and
//! only then combined with the input and output paths, which always come
//! from the builder itself.

use std::path::{Path, PathBuf};

use crate::error::DirectiveError;

/// Maximum directive length in bytes.
pub const MAX_DIRECTIVE_BYTES: usize = 4096;

/// Maximum number of tokens in a directive.
pub const MAX_DIRECTIVE_TOKENS: usize = 256;

/// Characters refused anywhere in a directive.
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '$', '`', '<', '>'];

/// Quoting and escaping characters of ffmpeg's own option and filter syntax.
const FFMPEG_ESCAPES: &[char] = &['\'', '\\'];

/// Options that take no value.
const FLAG_OPTIONS: &[&str] = &[
    "-y",
    "-n",
    "-an",
    "-vn",
    "-sn",
    "-dn",
    "-shortest",
    "-hide_banner",
    "-nostdin",
    "-stats",
    "-nostats",
    "-copyts",
    "-start_at_zero",
    "-re",
    "-accurate_seek",
    "-noaccurate_seek",
    "-benchmark",
    "-benchmark_all",
    "-ignore_unknown",
    "-copy_unknown",
    "-xerror",
    "-debug_ts",
    "-autorotate",
    "-noautorotate",
    "-autoscale",
    "-noautoscale",
    "-intra",
    "-bitexact",
    "-dump",
    "-hex",
];

/// Options that take exactly one value. Anything not listed here or in
/// `FLAG_OPTIONS` is refused, since ffmpeg would otherwise read a following
/// token as an extra output file.
const VALUE_OPTIONS: &[&str] = &[
    // codecs and formats
    "-c",
    "-codec",
    "-vcodec",
    "-acodec",
    "-scodec",
    "-f",
    "-bsf",
    "-tag",
    "-vtag",
    "-atag",
    // rate control
    "-b",
    "-ab",
    "-vb",
    "-maxrate",
    "-minrate",
    "-bufsize",
    "-crf",
    "-cq",
    "-qp",
    "-q",
    "-qscale",
    "-qmin",
    "-qmax",
    "-rc",
    "-pass",
    "-aq",
    "-vbr",
    "-compression_level",
    "-cutoff",
    "-frame_size",
    "-application",
    // encoder tuning
    "-preset",
    "-tune",
    "-profile",
    "-level",
    "-g",
    "-bf",
    "-keyint_min",
    "-sc_threshold",
    "-refs",
    "-force_key_frames",
    "-rc-lookahead",
    "-x264-params",
    "-x264opts",
    "-x265-params",
    "-svtav1-params",
    "-cpu-used",
    "-deadline",
    "-row-mt",
    "-tile-columns",
    "-lag-in-frames",
    "-speed",
    "-quality",
    "-lossless",
    // picture and sound
    "-pix_fmt",
    "-r",
    "-fpsmax",
    "-s",
    "-aspect",
    "-top",
    "-field_order",
    "-color_primaries",
    "-color_trc",
    "-colorspace",
    "-color_range",
    "-ar",
    "-ac",
    "-sample_fmt",
    "-channel_layout",
    "-ch_layout",
    // timing and stream selection
    "-t",
    "-to",
    "-ss",
    "-fs",
    "-frames",
    "-vframes",
    "-aframes",
    "-dframes",
    "-map",
    "-map_metadata",
    "-map_chapters",
    "-fps_mode",
    "-vsync",
    "-async",
    "-timecode",
    // muxing
    "-metadata",
    "-disposition",
    "-movflags",
    "-brand",
    "-fflags",
    "-flags",
    "-avoid_negative_ts",
    "-max_muxing_queue_size",
    "-max_interleave_delta",
    "-muxdelay",
    "-muxpreload",
    "-strict",
    "-threads",
    "-filter_threads",
    "-filter_complex_threads",
    "-sws_flags",
    // filter graphs
    "-vf",
    "-af",
    "-filter",
    "-filter_complex",
    "-lavfi",
];

/// Options that read or write files chosen by the caller.
const FORBIDDEN_OPTIONS: &[&str] = &[
    "-progress",
    "-vstats",
    "-vstats_file",
    "-passlogfile",
    "-attach",
    "-dump_attachment",
    "-filter_script",
    "-filter_complex_script",
    "-sdp_file",
    "-fpre",
    "-vpre",
    "-apre",
    "-spre",
    "-report",
    "-segment_list",
    "-hls_segment_filename",
    "-hls_key_info_file",
];

/// Options whose value is a filter graph.
const FILTER_OPTIONS: &[&str] = &["-vf", "-af", "-filter", "-filter_complex", "-lavfi"];

/// Filters that open files, devices or plugins.
const FORBIDDEN_FILTERS: &[&str] = &[
    "movie", "amovie", "subtitles", "ass", "sendcmd", "asendcmd", "lut1d", "lut3d", "zmq",
    "azmq", "frei0r", "frei0r_src", "ladspa", "lv2",
];

/// A vetted processing directive: flags and filters only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    tokens: Vec<String>,
}

impl Directive {
    /// Tokenize and vet a raw directive.
    ///
    /// This is pure: nothing is spawned and no file is touched.
    pub fn parse(text: &str) -> Result<Self, DirectiveError> {
        if text.trim().is_empty() {
            return Err(DirectiveError::Empty);
        }
        if text.len() > MAX_DIRECTIVE_BYTES {
            return Err(DirectiveError::TooLong);
        }
        if let Some(c) = text.chars().find(|c| is_forbidden_char(*c)) {
            return Err(DirectiveError::ShellMetacharacter(c));
        }

        let tokens = tokenize(text)?;
        if tokens.len() > MAX_DIRECTIVE_TOKENS {
            return Err(DirectiveError::TooLong);
        }

        vet(&tokens)?;
        Ok(Self { tokens })
    }

    /// The vetted tokens, in order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

fn is_forbidden_char(c: char) -> bool {
    SHELL_METACHARACTERS.contains(&c) || (c.is_control() && c != ' ' && c != '\t')
}

/// Split text into tokens, honouring single quotes, double quotes and backslash escapes.
fn tokenize(text: &str) -> Result<Vec<String>, DirectiveError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(DirectiveError::UnbalancedQuote),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(DirectiveError::UnbalancedQuote),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(DirectiveError::UnbalancedQuote),
                    }
                }
            }
            '\\' => {
                in_token = true;
                current.push(chars.next().unwrap_or('\\'));
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

fn vet(tokens: &[String]) -> Result<(), DirectiveError> {
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        if !is_option(token) {
            // FFmpeg treats every positional argument as an output file.
            return Err(DirectiveError::OutputOverride(token.clone()));
        }

        let name = option_name(token);
        if name == "-i" {
            return Err(DirectiveError::InputOverride);
        }
        // "-/opt file" loads the option value from a file.
        if name.starts_with("-/") || FORBIDDEN_OPTIONS.contains(&name) {
            return Err(DirectiveError::ForbiddenOption(name.to_string()));
        }
        if FLAG_OPTIONS.contains(&name) {
            continue;
        }
        if !VALUE_OPTIONS.contains(&name) {
            return Err(DirectiveError::ForbiddenOption(name.to_string()));
        }

        let value = iter
            .next()
            .ok_or_else(|| DirectiveError::MissingValue(name.to_string()))?;

        if FILTER_OPTIONS.contains(&name) {
            check_filter_graph(value)?;
        }
    }

    for token in tokens {
        // ffmpeg unquotes and unescapes option and filter values itself, which
        // would hide names and paths from the checks below.
        if token.contains(FFMPEG_ESCAPES) {
            return Err(DirectiveError::EscapedValue(token.clone()));
        }
        if token.contains("://") {
            return Err(DirectiveError::RemoteReference);
        }
        if references_outside_path(token) {
            return Err(DirectiveError::PathReference(token.clone()));
        }
    }

    Ok(())
}

fn is_option(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

/// Strip a stream specifier: "-c:v" -> "-c", "-filter:a" -> "-filter".
fn option_name(token: &str) -> &str {
    token.split(':').next().unwrap_or(token)
}

fn references_outside_path(token: &str) -> bool {
    token.starts_with('/')
        || token.starts_with('~')
        || token.contains("=/")
        || token.contains("=~")
        || token.contains(":/")
        || token.contains("..")
}

fn check_filter_graph(graph: &str) -> Result<(), DirectiveError> {
    for segment in graph.split(',') {
        let name = filter_name(segment);
        if FORBIDDEN_FILTERS.contains(&name.as_str()) {
            return Err(DirectiveError::ForbiddenFilter(name));
        }
    }
    Ok(())
}

/// Extract the filter name from "[in]scale@main=640:360[out]".
fn filter_name(segment: &str) -> String {
    let mut rest = segment.trim();
    while let Some(stripped) = rest.strip_prefix('[') {
        rest = match stripped.find(']') {
            Some(end) => stripped[end + 1..].trim_start(),
            None => "",
        };
    }
    rest.split(|c| c == '=' || c == '@' || c == '[')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Append the tokens of a vetted directive as output arguments.
    pub fn directive(mut self, directive: &Directive) -> Self {
        self.output_args.extend(directive.tokens().iter().cloned());
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-nostdin".to_string()];

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<String> {
        Directive::parse(text).unwrap().tokens().to_vec()
    }

    #[test]
    fn test_simple_scale_directive() {
        assert_eq!(tokens("-vf scale=640:360"), vec!["-vf", "scale=640:360"]);
    }

    #[test]
    fn test_quoting_rules() {
        assert_eq!(
            tokens(r#"-metadata "title=My Clip" -metadata 'comment=a "b"'"#),
            vec!["-metadata", "title=My Clip", "-metadata", r#"comment=a "b""#]
        );
        assert_eq!(
            tokens(r#"-metadata title=a\ b"#),
            vec!["-metadata", "title=a b"]
        );
        assert_eq!(
            tokens(r#"-metadata "title=say \"hi\"""#),
            vec!["-metadata", r#"title=say "hi""#]
        );
    }

    #[test]
    fn test_flags_do_not_consume_values() {
        assert_eq!(
            tokens("-an -c:v libx264 -crf 23 -shortest"),
            vec!["-an", "-c:v", "libx264", "-crf", "23", "-shortest"]
        );
    }

    #[test]
    fn test_negative_values_are_values() {
        assert_eq!(
            tokens("-bf -1 -vf scale=-2:720"),
            vec!["-bf", "-1", "-vf", "scale=-2:720"]
        );
    }

    #[test]
    fn test_empty_directive_rejected() {
        assert_eq!(Directive::parse(""), Err(DirectiveError::Empty));
        assert_eq!(Directive::parse("   \t "), Err(DirectiveError::Empty));
    }

    #[test]
    fn test_input_override_rejected() {
        assert_eq!(
            Directive::parse("-i /etc/passwd -vf scale=640:360"),
            Err(DirectiveError::InputOverride)
        );
        assert_eq!(
            Directive::parse("-vf scale=640:360 -i other.mp4"),
            Err(DirectiveError::InputOverride)
        );
    }

    #[test]
    fn test_output_override_rejected() {
        assert_eq!(
            Directive::parse("-vf scale=640:360 second.mp4"),
            Err(DirectiveError::OutputOverride("second.mp4".to_string()))
        );
        assert_eq!(
            Directive::parse("-c copy -"),
            Err(DirectiveError::OutputOverride("-".to_string()))
        );
    }

    #[test]
    fn test_shell_metacharacters_rejected() {
        assert_eq!(
            Directive::parse("-vf scale=640:360; rm -rf x"),
            Err(DirectiveError::ShellMetacharacter(';'))
        );
        assert_eq!(
            Directive::parse("-vf 'scale=640:360' | cat"),
            Err(DirectiveError::ShellMetacharacter('|'))
        );
        assert_eq!(
            Directive::parse("-metadata title=$(id)"),
            Err(DirectiveError::ShellMetacharacter('$'))
        );
        assert_eq!(
            Directive::parse("-vf scale=640:360\n-an"),
            Err(DirectiveError::ShellMetacharacter('\n'))
        );
    }

    #[test]
    fn test_unbalanced_quote_rejected() {
        assert_eq!(
            Directive::parse("-metadata 'title=oops"),
            Err(DirectiveError::UnbalancedQuote)
        );
        assert_eq!(
            Directive::parse("-metadata \"title=oops"),
            Err(DirectiveError::UnbalancedQuote)
        );
    }

    #[test]
    fn test_file_options_rejected() {
        assert_eq!(
            Directive::parse("-progress stats.txt"),
            Err(DirectiveError::ForbiddenOption("-progress".to_string()))
        );
        assert_eq!(
            Directive::parse("-/filter_complex graph.txt"),
            Err(DirectiveError::ForbiddenOption("-/filter_complex".to_string()))
        );
    }

    #[test]
    fn test_file_filters_rejected() {
        assert_eq!(
            Directive::parse("-vf scale=640:360,subtitles=subs.srt"),
            Err(DirectiveError::ForbiddenFilter("subtitles".to_string()))
        );
        assert_eq!(
            Directive::parse("-filter_complex [0:v]movie=x.mp4[m]"),
            Err(DirectiveError::ForbiddenFilter("movie".to_string()))
        );
        assert!(Directive::parse("-filter:v scale@main=640:360").is_ok());
    }

    #[test]
    fn test_remote_and_path_references_rejected() {
        assert_eq!(
            Directive::parse("-vf drawtext=textfile=http://example.com/x"),
            Err(DirectiveError::RemoteReference)
        );
        assert_eq!(
            Directive::parse("-vf drawtext=textfile=/etc/passwd"),
            Err(DirectiveError::PathReference(
                "drawtext=textfile=/etc/passwd".to_string()
            ))
        );
        assert!(matches!(
            Directive::parse("-vf drawtext=textfile=../secret"),
            Err(DirectiveError::PathReference(_))
        ));
    }

    #[test]
    fn test_ffmpeg_quoting_rejected() {
        assert_eq!(
            Directive::parse(r#"-vf "drawtext=textfile='/etc/passwd'""#),
            Err(DirectiveError::EscapedValue(
                "drawtext=textfile='/etc/passwd'".to_string()
            ))
        );
        assert!(matches!(
            Directive::parse(r"-vf drawtext=textfile=\\/etc/passwd"),
            Err(DirectiveError::EscapedValue(_))
        ));
        assert!(matches!(
            Directive::parse(r#"-vf "scale=640:360,'zmq'""#),
            Err(DirectiveError::EscapedValue(_))
        ));
        assert!(matches!(
            Directive::parse(r#"-vf "'movie'=x.mp4""#),
            Err(DirectiveError::EscapedValue(_))
        ));
        assert!(matches!(
            Directive::parse(r#"-vf "mo\vie=x.mp4""#),
            Err(DirectiveError::EscapedValue(_))
        ));
    }

    #[test]
    fn test_unknown_options_rejected() {
        assert_eq!(
            Directive::parse("-copyinkf second.mp4 -vf scale=640:360"),
            Err(DirectiveError::ForbiddenOption("-copyinkf".to_string()))
        );
        assert_eq!(
            Directive::parse("-fix_sub_duration second.mp4"),
            Err(DirectiveError::ForbiddenOption("-fix_sub_duration".to_string()))
        );
        assert_eq!(
            Directive::parse("-stdin -an"),
            Err(DirectiveError::ForbiddenOption("-stdin".to_string()))
        );
    }

    #[test]
    fn test_common_encoding_options_accepted() {
        assert!(Directive::parse(
            "-c:v libx264 -preset fast -crf 23 -pix_fmt yuv420p -b:a 128k -ac 2 \
             -movflags +faststart -map 0:v:0 -map 0:a? -t 30"
        )
        .is_ok());
    }

    #[test]
    fn test_missing_value_rejected() {
        assert_eq!(
            Directive::parse("-vf scale=640:360 -crf"),
            Err(DirectiveError::MissingValue("-crf".to_string()))
        );
    }

    #[test]
    fn test_too_long_rejected() {
        let long = "-an ".repeat(MAX_DIRECTIVE_TOKENS + 1);
        assert_eq!(Directive::parse(&long), Err(DirectiveError::TooLong));
    }

    #[test]
    fn test_command_builder_places_paths() {
        let directive = Directive::parse("-vf scale=640:360").unwrap();
        let args = FfmpegCommand::new("/scratch/input.mp4", "/scratch/output.mp4")
            .log_level("warning")
            .directive(&directive)
            .build_args();

        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-nostdin",
                "-y",
                "-v",
                "warning",
                "-i",
                "/scratch/input.mp4",
                "-vf",
                "scale=640:360",
                "/scratch/output.mp4",
            ]
        );
    }
}
