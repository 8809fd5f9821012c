//! The `user.color` xattr palette: a fixed table of named colors, each
//! with an ANSI CSI prefix used to colorize `ls` output, plus a CSI
//! stripper applied to every path the engine receives (so a caller
//! can't smuggle control sequences into a name via an escaped path).

pub const COLOR_MAX: u8 = 12;

struct ColorInfo {
    code: u8,
    name: &'static str,
    ansi: &'static str,
}

const TABLE: [ColorInfo; COLOR_MAX as usize] = [
    ColorInfo { code: 0, name: "none", ansi: "" },
    ColorInfo { code: 1, name: "red", ansi: "\x1b[31m" },
    ColorInfo { code: 2, name: "green", ansi: "\x1b[32m" },
    ColorInfo { code: 3, name: "blue", ansi: "\x1b[34m" },
    ColorInfo { code: 4, name: "yellow", ansi: "\x1b[33m" },
    // Purple and magenta are distinct named colors that happen to
    // share a basic-16 ANSI code; there is no extended-palette purple
    // in the base 8 colors to tell them apart visually.
    ColorInfo { code: 5, name: "magenta", ansi: "\x1b[35m" },
    ColorInfo { code: 6, name: "cyan", ansi: "\x1b[36m" },
    ColorInfo { code: 7, name: "white", ansi: "\x1b[37m" },
    ColorInfo { code: 8, name: "black", ansi: "\x1b[30m" },
    ColorInfo { code: 9, name: "orange", ansi: "\x1b[38;5;208m" },
    ColorInfo { code: 10, name: "purple", ansi: "\x1b[35m" },
    ColorInfo { code: 11, name: "gray", ansi: "\x1b[90m" },
];

const RESET: &str = "\x1b[0m";

/// Looks up a color by name (case-sensitive, matching the on-disk
/// palette exactly), returning its numeric code for storage in
/// `Inode::color`.
pub fn parse_color_name(name: &str) -> Option<u8> {
    TABLE.iter().find(|c| c.name == name).map(|c| c.code)
}

/// The reverse of `parse_color_name`: the color's canonical name,
/// falling back to `"none"` for an out-of-range code.
pub fn color_name(code: u8) -> &'static str {
    TABLE
        .iter()
        .find(|c| c.code == code)
        .map(|c| c.name)
        .unwrap_or("none")
}

/// Wraps `text` in the color's ANSI prefix/reset pair. `none` (code 0)
/// returns `text` unwrapped.
pub fn colorize(code: u8, text: &str) -> String {
    let info = TABLE.iter().find(|c| c.code == code);
    match info {
        Some(c) if !c.ansi.is_empty() => format!("{}{}{}", c.ansi, text, RESET),
        _ => text.to_string(),
    }
}

/// Strips every `ESC [ ... m` CSI sequence out of `input`, leaving
/// everything else untouched. Applied to incoming paths so a caller
/// can't embed control sequences in a name.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
