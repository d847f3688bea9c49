//! Error classifier: raw command output to [`StructuredFailure`].
//!
//! Classification is a fixed, ordered table of `(kind, pattern, extractor)`
//! rules. Rules are grouped by [`FailureKind`] in priority order, so the
//! first rule that matches anywhere in the output decides the kind.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::domain::{Confidence, Evidence, FailureKind, StructuredFailure};

const NAME: &str = r"[A-Za-z0-9][A-Za-z0-9._-]*";

type Extractor = fn(&Captures<'_>, &str) -> (Evidence, Confidence);

struct Rule {
    kind: FailureKind,
    pattern: Regex,
    /// Whether the rule also fires when the command exited 0.
    on_success: bool,
    extract: Extractor,
}

impl Rule {
    fn new(kind: FailureKind, pattern: &str, on_success: bool, extract: Extractor) -> Self {
        Self {
            kind,
            pattern: Regex::new(pattern).expect("classifier rule should compile"),
            on_success,
            extract,
        }
    }
}

static BUILT_PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:Failed building wheel for|Failed to build|Building wheel for|Running setup\.py install for) ({NAME})"
    ))
    .expect("BUILT_PACKAGE_RE should compile")
});

static INDEX_PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:/simple/({NAME})/|satisfies the requirement ({NAME})|Collecting ({NAME}))"
    ))
    .expect("INDEX_PACKAGE_RE should compile")
});

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use FailureKind::*;
    vec![
        // pip's post-install check: "b 1.5 requires a<2.0, but you have a 2.0 which is incompatible."
        Rule::new(
            VersionConflict,
            &format!(r"({NAME}) (\S+) (?:requires|has requirement) {NAME}[^,\n]*, but you have ({NAME}) (\S+)"),
            true,
            |c, _| {
                exact_conflict(
                    &c[3],
                    Some(c[4].trim_end_matches('.')),
                    Some(&c[1]),
                    Some(&c[2]),
                )
            },
        ),
        Rule::new(
            VersionConflict,
            &format!(r"({NAME})==([^\s,;]+) conflicts with ({NAME})==([^\s,;]+)"),
            true,
            |c, _| exact_conflict(&c[1], Some(&c[2]), Some(&c[3]), Some(&c[4])),
        ),
        Rule::new(
            VersionConflict,
            &format!(r"Cannot install ({NAME})==(\S+?),? and ({NAME})==(\S+?) because"),
            true,
            |c, _| exact_conflict(&c[1], Some(&c[2]), Some(&c[3]), Some(&c[4])),
        ),
        // uv: "Because a==2.0 depends on b>=2 and you require b==1.5, ..."
        Rule::new(
            VersionConflict,
            &format!(r"Because ({NAME})==([^\s,]+) depends on {NAME}[^\n]*? and you require ({NAME})==([^\s,]+)"),
            true,
            |c, _| exact_conflict(&c[1], Some(&c[2]), Some(&c[3]), Some(&c[4])),
        ),
        // The pinned release does not exist, but the index answered.
        Rule::new(
            VersionConflict,
            &format!(r"Could not find a version that satisfies the requirement ({NAME})(?:\[[^\]]*\])?\s*==\s*([^\s,;)]+) \(from versions: [^)]*\d[^)]*\)"),
            true,
            |c, _| exact_conflict(&c[1], Some(&c[2]), None, None),
        ),
        Rule::new(
            VersionConflict,
            r"ResolutionImpossible|conflicting dependencies|versions have conflicting",
            true,
            |_, _| (Evidence::default(), Confidence::Ambiguous),
        ),
        Rule::new(
            MissingSystemLibrary,
            r"fatal error: ([A-Za-z0-9_./+-]+?)\.h: No such file or directory",
            true,
            |c, text| system_library(&c[1], text),
        ),
        Rule::new(
            MissingSystemLibrary,
            r"(lib[A-Za-z0-9_+-]+)\.so(?:\.\d+)*: cannot open shared object file",
            true,
            |c, text| system_library(&c[1], text),
        ),
        Rule::new(
            MissingSystemLibrary,
            r"cannot find -l([A-Za-z0-9_+-]+)",
            true,
            |c, text| system_library(&c[1], text),
        ),
        Rule::new(
            MissingSystemLibrary,
            r"Package '?([A-Za-z0-9_.+-]+?)'?,? (?:was not found in the pkg-config search path|not found)",
            true,
            |c, text| system_library(&c[1], text),
        ),
        Rule::new(
            MissingSystemLibrary,
            r"(pg_config|mysql_config)(?: executable)?:? not found",
            true,
            |c, text| system_library(&c[1], text),
        ),
        Rule::new(
            MissingSystemLibrary,
            r"(?:error: command '(?:/usr/bin/)?(gcc|cc|g\+\+|swig)' failed: No such file|(?:sh: \d+: |bash: )(gcc|cc|g\+\+|make|cmake|pkg-config|swig|git|cargo|rustc):(?: command)? not found)",
            true,
            |c, text| {
                let tool = c.get(1).or_else(|| c.get(2)).map_or("gcc", |m| m.as_str());
                system_library(tool, text)
            },
        ),
        Rule::new(
            NetworkFailure,
            r"(?i)(temporary failure in name resolution|could not resolve host|name or service not known|failed to establish a new connection|connection (?:refused|reset by peer)|network is unreachable|max retries exceeded|read ?timed? ?out|(?:connect|read)timeouterror|connection (?:to \S+ )?timed out|\((?:connect|read) timeout=|the (?:read|handshake|write) operation timed out|operation timed out after|failed to fetch|could not fetch url|could not resolve)",
            false,
            |_, text| {
                let package = INDEX_PACKAGE_RE.captures(text).and_then(|c| {
                    c.get(1)
                        .or_else(|| c.get(2))
                        .or_else(|| c.get(3))
                        .map(|m| m.as_str().to_string())
                });
                (
                    Evidence {
                        package,
                        ..Evidence::default()
                    },
                    Confidence::Ambiguous,
                )
            },
        ),
        Rule::new(
            InfrastructureFailure,
            r"(?i)(no space left on device|cannot connect to the docker daemon|oci runtime (?:exec|create) failed|error response from daemon|container [0-9a-f]+ is not running)",
            false,
            |_, _| (Evidence::default(), Confidence::Ambiguous),
        ),
        Rule::new(
            BuildOrCompileFailure,
            r"(?m)(Failed building wheel for|Failed to build \S|error: command '[^']+' failed|subprocess-exited-with-error|metadata-generation-failed|legacy-install-failure|compilation terminated|^\s*SyntaxError: )",
            false,
            |_, text| built_package(text),
        ),
        Rule::new(
            TestFailure,
            r"(?m)^(?:E\s+)?(?:ModuleNotFoundError|ImportError): No module named '([A-Za-z0-9_.]+)'",
            false,
            |c, _| {
                let module = c[1].split('.').next().unwrap_or(&c[1]).to_string();
                (
                    Evidence {
                        package: Some(module),
                        ..Evidence::default()
                    },
                    Confidence::Ambiguous,
                )
            },
        ),
        Rule::new(
            TestFailure,
            r"(?m)(^FAILED \S+|^ERROR \S+|=+ .*\b\d+ (?:failed|errors?)\b.*=+|^FAIL: \S+)",
            false,
            |_, _| (Evidence::default(), Confidence::Ambiguous),
        ),
    ]
});

fn exact_conflict(
    package: &str,
    version: Option<&str>,
    peer: Option<&str>,
    peer_version: Option<&str>,
) -> (Evidence, Confidence) {
    (
        Evidence {
            package: Some(package.to_string()),
            version: version.map(str::to_string),
            peer: peer.map(str::to_string),
            peer_version: peer_version.map(str::to_string),
            ..Evidence::default()
        },
        Confidence::Exact,
    )
}

fn system_library(library: &str, text: &str) -> (Evidence, Confidence) {
    let package = BUILT_PACKAGE_RE
        .captures(text)
        .map(|c| c[1].to_string());
    (
        Evidence {
            package,
            system_dependency: Some(system_package_for(library)),
            ..Evidence::default()
        },
        Confidence::Exact,
    )
}

fn built_package(text: &str) -> (Evidence, Confidence) {
    match BUILT_PACKAGE_RE.captures(text) {
        Some(c) => (
            Evidence {
                package: Some(c[1].to_string()),
                ..Evidence::default()
            },
            Confidence::Exact,
        ),
        None => (Evidence::default(), Confidence::Ambiguous),
    }
}

/// Map a missing header, library or tool to the Debian package providing it.
pub fn system_package_for(library: &str) -> String {
    let lower = library.trim().to_ascii_lowercase();
    let first = lower.split('/').next().unwrap_or(&lower);
    let first = first.trim_end_matches(".h");
    let stem = first.strip_prefix("lib").unwrap_or(first);

    let mapped = match stem {
        s if s.starts_with("python") => "python3-dev",
        "xml" | "xml2" => "libxml2-dev",
        "xslt" => "libxslt1-dev",
        "openssl" | "ssl" | "crypto" => "libssl-dev",
        "ffi" => "libffi-dev",
        "pg_config" | "pq" | "pq-fe" | "postgresql" => "libpq-dev",
        "mysql" | "mysql_config" | "mysqlclient" => "libmysqlclient-dev",
        "gl" => "libgl1",
        "glib-2.0" | "glib" | "gthread-2.0" => "libglib2.0-0",
        "z" | "zlib" => "zlib1g-dev",
        "jpeg" | "jpeglib" => "libjpeg-dev",
        "png" => "libpng-dev",
        "sqlite3" => "libsqlite3-dev",
        "bz2" | "bzlib" => "libbz2-dev",
        "yaml" => "libyaml-dev",
        "gcc" | "cc" | "g++" | "make" => "build-essential",
        "cmake" | "pkg-config" | "swig" | "git" => first,
        "cargo" | "rustc" => "cargo",
        _ => return format!("lib{stem}-dev"),
    };
    mapped.to_string()
}

/// The full line containing byte offset `at`.
fn line_at(text: &str, at: usize) -> &str {
    let start = text[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[at..].find('\n').map(|i| at + i).unwrap_or(text.len());
    text[start..end].trim()
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
}

/// Classify one command result.
///
/// Returns `None` only when `exit_code` is 0 and no failure marker that
/// applies to successful commands is present. A non-zero exit with no
/// recognised marker is [`FailureKind::Unrecognized`].
pub fn classify(exit_code: i32, stdout: &str, stderr: &str) -> Option<StructuredFailure> {
    let text = format!("{stderr}\n{stdout}");

    for rule in RULES.iter() {
        if exit_code == 0 && !rule.on_success {
            continue;
        }
        if let Some(caps) = rule.pattern.captures(&text) {
            let (mut evidence, confidence) = (rule.extract)(&caps, &text);
            if let Some(m) = caps.get(0) {
                evidence.span = line_at(&text, m.start()).to_string();
            }
            return Some(StructuredFailure::new(rule.kind, evidence, confidence));
        }
    }

    if exit_code == 0 {
        return None;
    }

    let span = match last_line(stderr) {
        "" => last_line(stdout),
        line => line,
    };
    Some(StructuredFailure::new(
        FailureKind::Unrecognized,
        Evidence {
            span: span.to_string(),
            ..Evidence::default()
        },
        Confidence::Ambiguous,
    ))
}
