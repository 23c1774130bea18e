use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Load variables from a shell-style credential file (KEY=VALUE lines,
/// `#` comments, optional single or double quotes around values).
/// A missing file yields an empty map; that is not an error.
pub fn load(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read env file: {}", path.display()))?;

    let mut vars = HashMap::new();

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Tolerate a leading `export` so a sourceable file also works here
        let line = line.strip_prefix("export ").unwrap_or(line).trim();

        let parts: Vec<&str> = line.splitn(2, '=').collect();
        if parts.len() == 2 {
            let key = parts[0].trim();
            let value = parts[1].trim().trim_matches('"').trim_matches('\'');
            vars.insert(key.to_string(), value.to_string());
        }
    }

    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_env(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join(".env")).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        dir
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = load(&dir.path().join(".env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn parses_values_comments_and_quotes() {
        let dir = write_env(
            "# credentials\n\
             OPENAI_API_KEY=sk-test\n\
             OPENAI_BASE_URL=\"https://example.invalid/v1\"\n\
             export MODEL='gpt-4o-mini'\n\
             \n\
             not a pair\n",
        );
        let vars = load(&dir.path().join(".env")).unwrap();
        assert_eq!(vars.get("OPENAI_API_KEY").unwrap(), "sk-test");
        assert_eq!(vars.get("OPENAI_BASE_URL").unwrap(), "https://example.invalid/v1");
        assert_eq!(vars.get("MODEL").unwrap(), "gpt-4o-mini");
        assert_eq!(vars.len(), 3);
    }
}
