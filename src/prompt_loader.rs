//! Prompt loader: stateless literal `{KEY}` substitution over files under a
//! prompts directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PromptLoader {
    prompts_dir: PathBuf,
}

impl PromptLoader {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
        }
    }

    pub fn load(&self, name: &str, values: &BTreeMap<String, String>) -> std::io::Result<String> {
        let path = self.prompts_dir.join(name);
        let template = std::fs::read_to_string(&path)?;
        Ok(substitute(&template, values))
    }
}

/// Missing placeholders are left as-is; extra keys in `values` are ignored.
pub fn substitute(template: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            out.push_str(rest);
            return out;
        };
        let end = start + end;
        let key = &rest[start + 1..end];
        out.push_str(&rest[..start]);
        match values.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..=end]),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_keys_and_leaves_unknown() {
        let mut values = BTreeMap::new();
        values.insert("NAME".to_string(), "sprint-a".to_string());
        let out = substitute("hello {NAME}, see {OTHER}", &values);
        assert_eq!(out, "hello sprint-a, see {OTHER}");
    }

    #[test]
    fn ignores_extra_keys() {
        let mut values = BTreeMap::new();
        values.insert("A".to_string(), "1".to_string());
        values.insert("UNUSED".to_string(), "2".to_string());
        assert_eq!(substitute("{A}", &values), "1");
    }

    #[test]
    fn load_reads_from_prompts_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greet.txt"), "hi {WHO}").unwrap();
        let loader = PromptLoader::new(dir.path());
        let mut values = BTreeMap::new();
        values.insert("WHO".to_string(), "world".to_string());
        assert_eq!(loader.load("greet.txt", &values).unwrap(), "hi world");
    }
}
