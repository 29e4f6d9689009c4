//! Extended attribute access.

use std::path::Path;
use tracing::debug;

const USER_NAMESPACE: &str = "user.";

/// Source of extended attributes for a path.
pub trait AttributeProvider: Send + Sync {
    /// Attribute names present on `path`
    fn list(&self, path: &Path) -> Vec<String>;

    /// Value of one attribute, empty when it cannot be read
    fn get(&self, path: &Path, name: &str) -> Vec<u8>;

    /// Every attribute as name/value pairs
    fn all(&self, path: &Path) -> Vec<(String, Vec<u8>)> {
        self.list(path)
            .into_iter()
            .map(|name| {
                let value = self.get(path, &name);
                (name, value)
            })
            .collect()
    }
}

/// Filesystem attributes without following symlinks.
///
/// Names in the `user.` namespace are reported without their prefix, and a
/// name without any namespace is looked up in `user.`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAttributes;

impl AttributeProvider for SystemAttributes {
    fn list(&self, path: &Path) -> Vec<String> {
        match xattr::list(path) {
            Ok(names) => names
                .map(|name| {
                    let name = name.to_string_lossy();
                    name.strip_prefix(USER_NAMESPACE)
                        .unwrap_or(&name)
                        .to_string()
                })
                .collect(),
            Err(e) => {
                debug!(path = %path.display(), "No extended attributes: {}", e);
                Vec::new()
            }
        }
    }

    fn get(&self, path: &Path, name: &str) -> Vec<u8> {
        let name = if name.contains('.') {
            name.to_string()
        } else {
            format!("{}{}", USER_NAMESPACE, name)
        };

        match xattr::get(path, &name) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                debug!(path = %path.display(), attribute = %name, "Unreadable attribute: {}", e);
                Vec::new()
            }
        }
    }

    // Values are fetched by their full name so `user.a.b` keeps its value
    // even though it is reported as `a.b`.
    fn all(&self, path: &Path) -> Vec<(String, Vec<u8>)> {
        let names = match xattr::list(path) {
            Ok(names) => names,
            Err(e) => {
                debug!(path = %path.display(), "No extended attributes: {}", e);
                return Vec::new();
            }
        };

        names
            .filter_map(|raw| {
                let value = xattr::get(path, &raw).ok().flatten()?;
                let name = raw.to_string_lossy();
                let name = name.strip_prefix(USER_NAMESPACE).unwrap_or(&name).to_string();
                Some((name, value))
            })
            .collect()
    }
}

/// Provider for platforms or runs that carry no attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttributes;

impl AttributeProvider for NoAttributes {
    fn list(&self, _path: &Path) -> Vec<String> {
        Vec::new()
    }

    fn get(&self, _path: &Path, _name: &str) -> Vec<u8> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct FixedAttributes(HashMap<PathBuf, Vec<(String, Vec<u8>)>>);

    impl AttributeProvider for FixedAttributes {
        fn list(&self, path: &Path) -> Vec<String> {
            self.0
                .get(path)
                .map(|attrs| attrs.iter().map(|(n, _)| n.clone()).collect())
                .unwrap_or_default()
        }

        fn get(&self, path: &Path, name: &str) -> Vec<u8> {
            self.0
                .get(path)
                .and_then(|attrs| attrs.iter().find(|(n, _)| n == name))
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        }
    }

    #[test]
    fn test_all_pairs_names_with_values() {
        let mut attrs = HashMap::new();
        attrs.insert(
            PathBuf::from("/f"),
            vec![
                ("comment".to_string(), b"hello".to_vec()),
                ("security.selinux".to_string(), b"ctx".to_vec()),
            ],
        );
        let provider = FixedAttributes(attrs);

        let all = provider.all(Path::new("/f"));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], ("comment".to_string(), b"hello".to_vec()));
        assert!(provider.all(Path::new("/other")).is_empty());
    }

    #[test]
    fn test_system_attributes_round_trip() -> std::io::Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        // Some filesystems (tmpfs on older kernels) refuse user attributes.
        if xattr::set(file.path(), "user.hostbackup.test", b"42").is_err() {
            return Ok(());
        }

        let names = SystemAttributes.list(file.path());
        assert!(names.contains(&"hostbackup.test".to_string()));
        assert_eq!(SystemAttributes.get(file.path(), "user.hostbackup.test"), b"42");

        let all = SystemAttributes.all(file.path());
        assert!(all.contains(&("hostbackup.test".to_string(), b"42".to_vec())));
        Ok(())
    }

    #[test]
    fn test_no_attributes() {
        assert!(NoAttributes.all(Path::new("/etc/hosts")).is_empty());
    }
}
