//! Markup selection helpers.
//!
//! Typesetting and full validation belong to the external typesetter; these
//! helpers only decide which payload a step renders and normalise LaTeX
//! delimiters so the typesetter always sees display math.

use std::sync::OnceLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

/// Matches a leading or trailing display-math delimiter.
fn delimiter_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^\$\$|\$\$$|^\\\[|\\\]$|^\\begin\{equation\}|\\end\{equation\}$").ok()
        })
        .as_ref()
}

/// Wraps LaTeX source in `\[...\]`, replacing any delimiters it already has.
///
/// ```
/// use mathboard_session::markup::format_display_math;
///
/// assert_eq!(format_display_math("$$x+1=2$$"), r"\[x+1=2\]");
/// assert_eq!(format_display_math(r"\[ x = 1 \]"), r"\[x = 1\]");
/// ```
pub fn format_display_math(latex: &str) -> String {
    let trimmed = latex.trim();
    let stripped = delimiter_pattern().map_or_else(
        || trimmed.to_string(),
        |re| re.replace_all(trimmed, "").into_owned(),
    );
    format!(r"\[{}\]", stripped.trim())
}

/// Returns `true` if `markup` is a single well-formed XML element named `math`.
///
/// Namespaced roots (`<m:math>`) and an XML declaration are accepted.
pub fn is_well_formed_mathml(markup: &str) -> bool {
    let mut reader = Reader::from_str(markup.trim());
    let mut depth = 0usize;
    let mut roots = 0usize;
    let mut root_is_math = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                if depth == 0 {
                    roots += 1;
                    root_is_math = element.local_name().as_ref() == b"math";
                }
                depth += 1;
            }
            Ok(Event::Empty(element)) => {
                if depth == 0 {
                    roots += 1;
                    root_is_math = element.local_name().as_ref() == b"math";
                }
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Ok(Event::Text(text)) if depth == 0 => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return false;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) if depth > 0 => {}
            Ok(Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_)) => {}
            // Entity references and CDATA are content, not allowed outside the root
            Ok(_) | Err(_) => return false,
        }
    }

    depth == 0 && roots == 1 && root_is_math
}
