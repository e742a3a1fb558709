//! KolibriScript program synthesis
//!
//! Turns a free-form prompt plus a mode label into a well-formed
//! KolibriScript program. Synthesis is deterministic and never involves the
//! guest: the surface syntax is a line-oriented language opened by a
//! case-insensitive `начало:` marker and closed by `конец.`, with indented
//! statement lines between them.

use regex::Regex;
use std::sync::OnceLock;

use crate::abi::DEFAULT_MODE;

/// Program synthesized for a whitespace-only prompt.
const EMPTY_REQUEST_PROGRAM: &str = "начало:\n    показать \"Пустой запрос\"\nконец.\n";

fn command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(показать|обучить|спросить|тикнуть|сохранить)")
            .expect("command pattern is a valid literal")
    })
}

fn program_start_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)начало\s*:").expect("start pattern is a valid literal"))
}

fn program_end_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)конец\.").expect("end pattern is a valid literal"))
}

/// Escape a value for embedding in a double-quoted KolibriScript string
/// literal. Backslashes are doubled before quotes are escaped so the value
/// cannot break out of the literal.
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn normalise_lines(input: &str) -> Vec<&str> {
    input
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Does the trimmed prompt already look like a complete program?
fn is_complete_program(trimmed: &str) -> bool {
    program_start_pattern().is_match(trimmed) && program_end_pattern().is_match(trimmed)
}

/// Synthesize a KolibriScript program from a prompt and mode label.
///
/// - Whitespace-only prompts become the fixed empty-request program.
/// - Prompts that already carry both program markers pass through trimmed,
///   with exactly one trailing newline (idempotent).
/// - Every other prompt is split into non-blank lines: recognized command
///   lines are kept verbatim, everything else is wrapped as a `показать`
///   statement. A non-default mode adds one announcement line up front.
pub fn build_script(prompt: &str, mode: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return EMPTY_REQUEST_PROGRAM.to_string();
    }

    if is_complete_program(trimmed) {
        return format!("{}\n", trimmed);
    }

    let mut script = String::from("начало:\n");
    if !mode.is_empty() && mode != DEFAULT_MODE {
        script.push_str("    показать \"Режим: ");
        script.push_str(&escape_literal(mode));
        script.push_str("\"\n");
    }
    for line in normalise_lines(trimmed) {
        if command_pattern().is_match(line) {
            script.push_str("    ");
            script.push_str(line);
        } else {
            script.push_str("    показать \"");
            script.push_str(&escape_literal(line));
            script.push('"');
        }
        script.push('\n');
    }
    script.push_str("конец.\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_prompt_yields_empty_request_program() {
        for prompt in ["", "   ", "\n\t \r\n"] {
            assert_eq!(build_script(prompt, DEFAULT_MODE), EMPTY_REQUEST_PROGRAM);
        }
    }

    #[test]
    fn test_complete_program_passes_through() {
        let program = "НАЧАЛО:\n    показать \"x\"\nКонец.";
        let built = build_script(program, DEFAULT_MODE);
        assert_eq!(built, format!("{}\n", program));
    }

    #[test]
    fn test_passthrough_is_idempotent() {
        let program = "начало:\n    тикнуть\nконец.\n";
        let once = build_script(program, DEFAULT_MODE);
        let twice = build_script(&once, DEFAULT_MODE);
        assert_eq!(once, twice);
        assert!(once.ends_with("конец.\n"));
        assert!(!once.ends_with("\n\n"));
    }

    #[test]
    fn test_start_marker_tolerates_spacing() {
        let program = "Начало :\n    тикнуть\nконец.";
        assert!(is_complete_program(program));
    }

    #[test]
    fn test_plain_line_becomes_print_statement() {
        let built = build_script("Что такое Kolibri?", DEFAULT_MODE);
        assert_eq!(
            built,
            "начало:\n    показать \"Что такое Kolibri?\"\nконец.\n"
        );
    }

    #[test]
    fn test_default_mode_adds_no_announcement() {
        let built = build_script("Что такое Kolibri?", "Быстрый ответ");
        assert!(!built.contains("Режим:"));
    }

    #[test]
    fn test_non_default_mode_is_announced_first() {
        let built = build_script("привет", "Глубокий анализ");
        let lines: Vec<&str> = built.lines().collect();
        assert_eq!(lines[0], "начало:");
        assert_eq!(lines[1], "    показать \"Режим: Глубокий анализ\"");
        assert_eq!(lines[2], "    показать \"привет\"");
        assert_eq!(lines[3], "конец.");
    }

    #[test]
    fn test_empty_mode_adds_no_announcement() {
        let built = build_script("привет", "");
        assert!(!built.contains("Режим:"));
    }

    #[test]
    fn test_command_lines_kept_verbatim() {
        let built = build_script("Спросить цену\nобычный текст", DEFAULT_MODE);
        let lines: Vec<&str> = built.lines().collect();
        assert_eq!(lines[1], "    Спросить цену");
        assert_eq!(lines[2], "    показать \"обычный текст\"");
    }

    #[test]
    fn test_backslashes_escaped_before_quotes() {
        // Input holds both a backslash and a quote; the backslash must be
        // doubled first or the escaped quote would gain an extra layer.
        let built = build_script(r#"path \ and "quote""#, DEFAULT_MODE);
        assert!(built.contains(r#"    показать "path \\ and \"quote\"""#));
    }

    #[test]
    fn test_escape_literal_ordering() {
        assert_eq!(escape_literal(r#"\""#), r#"\\\""#);
        assert_eq!(escape_literal(r"a\b"), r"a\\b");
        assert_eq!(escape_literal(r#"say "hi""#), r#"say \"hi\""#);
    }

    #[test]
    fn test_blank_and_padded_lines_are_normalised() {
        let built = build_script("  первая  \n\n\r\n  вторая\t\n", DEFAULT_MODE);
        let lines: Vec<&str> = built.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "    показать \"первая\"");
        assert_eq!(lines[2], "    показать \"вторая\"");
    }
}
