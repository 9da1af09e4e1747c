/*
 * ApkSign v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Terminal output: levelled messages on stderr, an optional progress bar for
//! the repackaging pass, and the signing report.

use crate::{APP_AUTHOR, APP_NAME, APP_VERSION};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Verbose,
    VeryVerbose,
    Debug,
    Success,
    Warn,
    Error,
}

impl Level {
    fn icon(self) -> &'static str {
        match self {
            Level::Info => "[i]",
            Level::Verbose => "[v]",
            Level::VeryVerbose => "[vv]",
            Level::Debug => "[dbg]",
            Level::Success => "[+]",
            Level::Warn => "[!]",
            Level::Error => "[x]",
        }
    }

    fn color(self) -> Color {
        match self {
            Level::Info => Color::Blue,
            Level::Success => Color::Green,
            Level::Warn => Color::Yellow,
            Level::Error => Color::Red,
            Level::Verbose | Level::VeryVerbose | Level::Debug => Color::White,
        }
    }

    fn is_dim(self) -> bool {
        matches!(self, Level::Verbose | Level::VeryVerbose | Level::Debug)
    }
}

pub struct Ui {
    pub verbose: bool,
    pub very_verbose: bool,
    pub debug: bool,
    silent: bool,
    colors: bool,
    progress_bar: Mutex<Option<ProgressBar>>,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new(false, false, false, false, true)
    }
}

impl Ui {
    pub fn new(v: bool, vv: bool, d: bool, s: bool, c: bool) -> Self {
        Self {
            verbose: v,
            very_verbose: vv,
            debug: d,
            silent: s,
            colors: c,
            progress_bar: Mutex::new(None),
        }
    }

    pub fn from_verbosity_level(level: u8, s: bool, c: bool) -> Self {
        Self::new(level >= 1, level >= 2, level >= 3, s, c)
    }

    /// Only errors get through. Used by library callers and tests.
    pub fn quiet() -> Self {
        Self::new(false, false, false, true, false)
    }

    pub fn show_progress_bar(&self, len: u64, msg: &str) {
        if self.silent {
            return;
        }
        let pb = ProgressBar::new(len);
        let tw = self.term_width();
        let msg = Self::truncate_msg(msg, tw);
        let template = if tw < 60 {
            format!("{{spinner:.green}} {} {{bar:.green/red}} {{pos}}/{{len}}", msg)
        } else {
            format!(
                "{{spinner:.green}} {} {{wide_bar:.green/red}} {{pos}}/{{len}} ({{eta}})",
                msg
            )
        };
        let style = ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["[|]", "[/]", "[-]", "[\\]"])
            .progress_chars("#>-");

        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        if let Ok(mut g) = self.progress_bar.lock() {
            *g = Some(pb);
        }
    }

    pub fn update_progress(&self, pos: u64) {
        if let Ok(g) = self.progress_bar.lock() {
            if let Some(ref pb) = *g {
                pb.set_position(pos);
            }
        }
    }

    pub fn finish_progress(&self) {
        if let Ok(mut g) = self.progress_bar.lock() {
            if let Some(pb) = g.take() {
                pb.finish_and_clear();
            }
        }
    }

    pub fn has_progress_bar(&self) -> bool {
        self.progress_bar
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }

    fn truncate_msg(msg: &str, tw: usize) -> String {
        let max_chars = if tw < 60 {
            8
        } else if tw < 80 {
            15
        } else {
            usize::MAX
        };
        if msg.chars().count() > max_chars {
            format!("{}...", msg.chars().take(max_chars).collect::<String>())
        } else {
            msg.to_string()
        }
    }

    pub fn print_banner(&self) {
        if !self.silent && self.verbose {
            self.print_rich_banner();
        }
    }

    pub fn print_rich_banner(&self) {
        let title = format!(" {} v{} ", APP_NAME, APP_VERSION);
        let width = title.len();

        if self.term_width() < width + 4 {
            if self.colors {
                eprintln!("{}", title.cyan().bold());
            } else {
                eprintln!("{}", title);
            }
        } else {
            let border = "-".repeat(width);
            if self.colors {
                let tb = format!("+-{}-+", border).magenta().bold();
                let mid = format!("| {} |", title.cyan().bold()).blue();
                eprintln!("{}\n{}\n{}", tb, mid, tb);
            } else {
                eprintln!("+-{}-+\n| {} |\n+-{}-+", border, title, border);
            }
        }
    }

    pub fn print_version_info(&self) {
        self.print_rich_banner();
        if self.colors {
            println!("{}", format!("Author:      {}", APP_AUTHOR).yellow());
            println!("{}", "License:     MIT".green());
            println!("{}", "Description: APK/JAR v1 signer.".magenta());
        } else {
            println!(
                "Author:      {}\nLicense:     MIT\nDescription: APK/JAR v1 signer.",
                APP_AUTHOR
            );
        }
    }

    fn supports_color(&self) -> bool {
        std::env::var("NO_COLOR").is_err() && self.colors
    }

    pub fn enable_colors_if_supported(&mut self) {
        #[cfg(windows)]
        if self.colors {
            colored::control::set_override(true);
        }
    }

    pub fn print_mode_header(&self, title: &str) {
        if self.silent || !self.verbose {
            return;
        }
        eprintln!();
        let header = format!("-- {} --", title);
        let text = if self.term_width() < header.len() {
            title.to_string()
        } else {
            header
        };
        if self.colors {
            eprintln!("{}", text.yellow().bold());
        } else {
            eprintln!("{}", text);
        }
    }

    fn enabled(&self, level: Level) -> bool {
        match level {
            Level::Error => true,
            Level::Warn | Level::Success => !self.silent,
            Level::Info | Level::Verbose => self.verbose && !self.silent,
            Level::VeryVerbose => self.very_verbose && !self.silent,
            Level::Debug => self.debug && !self.silent,
        }
    }

    fn emit(&self, level: Level, msg: &str) {
        if !self.enabled(level) {
            return;
        }
        let icon = level.icon();
        let indent = if self.term_width() < 40 { 2 } else { icon.len() + 1 };
        let wrapped = self.wrap_msg(msg, indent);
        let mut lines = wrapped.split('\n');
        let first = lines.next().unwrap_or_default();

        if self.supports_color() {
            let painted = icon.color(level.color()).bold();
            if level.is_dim() {
                eprintln!("{} {}", painted.dimmed(), first.dimmed());
            } else {
                eprintln!("{} {}", painted, first);
            }
        } else {
            eprintln!("{} {}", icon, first);
        }
        for line in lines {
            if self.supports_color() && level.is_dim() {
                eprintln!("{:indent$}{}", "", line.dimmed(), indent = indent);
            } else {
                eprintln!("{:indent$}{}", "", line, indent = indent);
            }
        }
    }

    pub fn info(&self, msg: &str) {
        self.emit(Level::Info, msg);
    }
    pub fn verbose(&self, msg: &str) {
        self.emit(Level::Verbose, msg);
    }
    pub fn very_verbose(&self, msg: &str) {
        self.emit(Level::VeryVerbose, msg);
    }
    pub fn debug(&self, msg: &str) {
        self.emit(Level::Debug, msg);
    }
    pub fn success(&self, msg: &str) {
        self.emit(Level::Success, msg);
    }
    pub fn warn(&self, msg: &str) {
        self.emit(Level::Warn, msg);
    }
    pub fn error(&self, msg: &str) {
        self.emit(Level::Error, msg);
    }

    pub fn print_summary(&self, title: &str, fields: &[(&str, String)]) {
        if self.silent || !self.verbose {
            return;
        }
        if self.colors {
            eprintln!("{}", format!("{}:", title).green().bold());
        } else {
            eprintln!("{}:", title);
        }
        let tw = self.term_width();

        for (key, val) in fields {
            let base_indent = if tw < 60 { 2 } else { 11 };
            let wrapped = self.wrap_msg(val, base_indent);

            for (i, line) in wrapped.split('\n').enumerate() {
                if i > 0 {
                    if self.colors {
                        eprintln!("{}{}", " ".repeat(base_indent), line.green());
                    } else {
                        eprintln!("{}{}", " ".repeat(base_indent), line);
                    }
                } else if self.colors {
                    eprintln!("  {:<8} {}", key.cyan().bold(), line.green());
                } else {
                    eprintln!("  {:<8} {}", key, line);
                }
            }
        }
    }

    fn wrap_msg(&self, msg: &str, indent: usize) -> String {
        let max_width = self.term_width();
        let effective_width = if max_width > 20 {
            max_width.saturating_sub(indent).max(20)
        } else {
            max_width.saturating_sub(indent).max(10)
        };
        let mut lines = Vec::new();
        let mut current_line = String::with_capacity(effective_width);

        for word in msg.split_whitespace() {
            let word_len = word.chars().count();
            let needed = if current_line.is_empty() {
                word_len
            } else {
                current_line.chars().count() + 1 + word_len
            };

            if needed <= effective_width {
                if !current_line.is_empty() {
                    current_line.push(' ');
                }
                current_line.push_str(word);
                continue;
            }
            if !current_line.is_empty() {
                lines.push(std::mem::take(&mut current_line));
            }
            // Paths without spaces get hard-split.
            let chars: Vec<char> = word.chars().collect();
            let mut chunks = chars.chunks(effective_width).peekable();
            while let Some(chunk) = chunks.next() {
                current_line.extend(chunk.iter());
                if chunks.peek().is_some() {
                    lines.push(std::mem::take(&mut current_line));
                }
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines.join("\n")
    }

    fn term_width(&self) -> usize {
        std::env::var("COLUMNS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| terminal_size::terminal_size().map(|(w, _)| w.0 as usize))
            .unwrap_or(80)
    }
}
