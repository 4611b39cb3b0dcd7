//! Syntax checks applied to patches before they are written back.

use std::path::Path;

use tokio::process::Command;

use crate::loader::script_engine;

/// Checks `code` for syntax errors according to `path`'s extension.
///
/// `.rhai` is compiled, `.sh` is checked with `sh -n`, anything else is
/// accepted.
///
/// # Errors
///
/// Returns the checker's message when the code is rejected.
pub async fn check_syntax(path: &Path, code: &str) -> Result<(), String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rhai") => script_engine()
            .compile(code)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Some("sh") => check_shell(code).await,
        _ => Ok(()),
    }
}

/// Human-readable language name for prompts.
pub fn language_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rhai") => "Rhai",
        Some("sh") => "POSIX shell",
        Some("py") => "Python",
        Some("js") => "JavaScript",
        _ => "plain text",
    }
}

async fn check_shell(code: &str) -> Result<(), String> {
    let file = tempfile::Builder::new()
        .suffix(".sh")
        .tempfile()
        .map_err(|e| format!("cannot create temp file: {}", e))?;
    std::fs::write(file.path(), code).map_err(|e| format!("cannot write temp file: {}", e))?;

    let output = Command::new("sh")
        .arg("-n")
        .arg(file.path())
        .output()
        .await
        .map_err(|e| format!("cannot run sh -n: {}", e))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rhai_checks() {
        assert!(check_syntax(Path::new("f.rhai"), "fn f(x) { x + 1 }").await.is_ok());
        assert!(check_syntax(Path::new("f.rhai"), "fn f(x { x + 1 }").await.is_err());
    }

    #[tokio::test]
    async fn test_shell_checks() {
        assert!(check_syntax(Path::new("p.sh"), "set -eu\necho ok\n").await.is_ok());
        assert!(check_syntax(Path::new("p.sh"), "if then fi\n").await.is_err());
    }

    #[tokio::test]
    async fn test_other_extensions_accepted() {
        assert!(check_syntax(Path::new("notes.txt"), "{{{ not code").await.is_ok());
    }

    #[test]
    fn test_language_for() {
        assert_eq!(language_for(Path::new("a.rhai")), "Rhai");
        assert_eq!(language_for(Path::new("a.sh")), "POSIX shell");
    }
}
