use crate::command::CommandOutcome;

/// Installed when the checkout ships no `requirements.txt`.
pub const FALLBACK_REQUIREMENTS: &[&str] = &[
    "Babel",
    "chardet",
    "cryptography",
    "decorator",
    "docutils",
    "gevent",
    "greenlet",
    "idna",
    "Jinja2",
    "libsass",
    "lxml",
    "MarkupSafe",
    "num2words",
    "ofxparse",
    "openpyxl",
    "passlib",
    "Pillow",
    "polib",
    "psutil",
    "psycopg2",
    "pyopenssl",
    "PyPDF2",
    "python-dateutil",
    "pytz",
    "qrcode",
    "reportlab",
    "requests",
    "rjsmin",
    "vobject",
    "Werkzeug",
    "xlrd",
    "XlsxWriter",
    "xlwt",
    "zeep",
];

/// Output fragments that point at the PostgreSQL driver failing to build.
const DRIVER_FAILURE_MARKERS: [&str; 2] = ["psycopg2", "pg_config"];

pub(super) const DRIVER_BINARY_PACKAGE: &str = "psycopg2-binary";

/// Whether a failed install is worth one retry with the prebuilt driver.
pub fn needs_driver_retry(outcome: &CommandOutcome) -> bool {
    !outcome.success
        && DRIVER_FAILURE_MARKERS
            .iter()
            .any(|marker| outcome.output_mentions(marker))
}

/// Distribution name of a requirement line (`psycopg2==2.9; sys_platform...`
/// gives `psycopg2`). `None` for blanks, comments and pip options.
fn requirement_name(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
        return None;
    }
    let end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(line.len());
    Some(&line[..end])
}

pub(super) fn is_source_driver(line: &str) -> bool {
    requirement_name(line).is_some_and(|name| name.eq_ignore_ascii_case("psycopg2"))
}

/// Drop the source-built driver from a requirements manifest.
pub fn filter_driver_requirements(content: &str) -> String {
    let mut filtered: String = content
        .lines()
        .filter(|line| !is_source_driver(line))
        .collect::<Vec<_>>()
        .join("\n");
    filtered.push('\n');
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_with(lines: &[&str]) -> CommandOutcome {
        CommandOutcome {
            success: false,
            code: Some(1),
            tail: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn retry_only_for_driver_failures() {
        assert!(needs_driver_retry(&failed_with(&[
            "Error: pg_config executable not found."
        ])));
        assert!(needs_driver_retry(&failed_with(&[
            "Failed building wheel for psycopg2"
        ])));
        assert!(!needs_driver_retry(&failed_with(&["No space left on device"])));

        let ok = CommandOutcome {
            success: true,
            ..failed_with(&["psycopg2 installed"])
        };
        assert!(!needs_driver_retry(&ok));
    }

    #[test]
    fn manifest_filtering_keeps_everything_else() {
        let manifest = "\
# core
Babel==2.9.1
psycopg2==2.8.6; sys_platform != 'win32' and python_version < '3.8'
psycopg2 == 2.9.5 ; python_version >= '3.11'
psycopg2-binary==2.9.5
lxml==4.9.2
";
        let filtered = filter_driver_requirements(manifest);
        assert!(filtered.contains("Babel==2.9.1"));
        assert!(filtered.contains("lxml==4.9.2"));
        assert!(filtered.contains("psycopg2-binary==2.9.5"));
        assert!(!filtered.contains("psycopg2==2.8.6"));
        assert!(!filtered.contains("psycopg2 == 2.9.5"));
    }

    #[test]
    fn options_and_comments_are_not_requirements() {
        assert_eq!(requirement_name("-r base.txt"), None);
        assert_eq!(requirement_name("  # psycopg2"), None);
        assert_eq!(requirement_name("Werkzeug>=2.0"), Some("Werkzeug"));
    }
}
