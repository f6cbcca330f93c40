use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::client::PageSession;

const IMAGE_EXT: &str = "jpg";
const UNSAFE: &[char] = &['/', '\\', ':', '(', ')', ' ', '*', '?', '"', '<', '>', '|'];

/// Filesystem-safe component: separators, parentheses, whitespace and shell-hostile
/// characters become `_`. Never empty, never `.` or `..`.
pub fn safe_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if UNSAFE.contains(&c) || c.is_whitespace() || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        return "unnamed".to_string();
    }
    cleaned
}

/// Directory name for a brand. When sanitizing altered the name, a short hash of the
/// raw name is appended so distinct brands never share a directory.
pub fn brand_dir_name(brand_name: &str) -> String {
    let safe = safe_component(brand_name);
    if safe == brand_name {
        return safe;
    }
    let hash = blake3::hash(brand_name.as_bytes()).to_hex();
    format!("{safe}_{}", &hash[..8])
}

/// Computes image destinations for one brand. Sibling file names are unique:
/// a name already claimed gets a numeric suffix.
pub struct ImagePlanner {
    brand_dir: PathBuf,
    claimed: HashSet<String>,
}

impl ImagePlanner {
    pub fn new(images_dir: &Path, brand_name: &str) -> Self {
        ImagePlanner {
            brand_dir: images_dir.join(brand_dir_name(brand_name)),
            claimed: HashSet::new(),
        }
    }

    pub fn model_path(&mut self, model_name: &str) -> PathBuf {
        let stem = safe_component(model_name);
        self.claim(stem)
    }

    /// Generation files carry the model name too, so same-named generations of
    /// different models stay apart.
    pub fn generation_path(&mut self, model_name: &str, generation_name: &str) -> PathBuf {
        let stem = format!(
            "{}__{}",
            safe_component(model_name),
            safe_component(generation_name)
        );
        self.claim(stem)
    }

    fn claim(&mut self, stem: String) -> PathBuf {
        let mut candidate = stem.clone();
        let mut n = 2;
        while !self.claimed.insert(candidate.to_lowercase()) {
            candidate = format!("{stem}_{n}");
            n += 1;
        }
        self.brand_dir.join(format!("{candidate}.{IMAGE_EXT}"))
    }
}

/// Download `url` to `dest`. Any failure is logged and reported as `None`.
pub async fn fetch_image<S: PageSession + ?Sized>(
    session: &S,
    url: &str,
    dest: &Path,
) -> Option<PathBuf> {
    let bytes = match session.fetch_bytes(url).await {
        Ok(b) => b,
        Err(e) => {
            warn!("Failed to download image {}: {}", url, e);
            return None;
        }
    };

    if let Some(parent) = dest.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!("Failed to create {}: {}", parent.display(), e);
            return None;
        }
    }
    if let Err(e) = tokio::fs::write(dest, &bytes).await {
        warn!("Failed to write image {}: {}", dest.display(), e);
        return None;
    }

    debug!("Saved image to {}", dest.display());
    Some(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::client::ExtractionClient;

    #[test]
    fn unsafe_characters_replaced() {
        let names = ["AC/DC: Mk (II)", r"back\slash", "a b\tc", "x|y*z?"];
        for name in names {
            let s = safe_component(name);
            for c in ['/', '\\', ':', '(', ')', ' ', '\t', '|', '*', '?'] {
                assert!(!s.contains(c), "{s:?} still contains {c:?}");
            }
        }
        assert_eq!(safe_component("AC/DC: Mk (II)"), "AC_DC__Mk__II_");
    }

    #[test]
    fn no_traversal() {
        assert_eq!(safe_component(".."), "unnamed");
        assert_eq!(safe_component(""), "unnamed");
        assert_eq!(safe_component("../../etc/passwd"), ".._.._etc_passwd");

        let root = Path::new("imgs");
        let mut planner = ImagePlanner::new(root, "../evil");
        let p = planner.model_path("../../x");
        assert_eq!(p.parent().unwrap().parent().unwrap(), root);
        assert!(p.components().all(|c| c.as_os_str() != ".."));
    }

    #[test]
    fn siblings_never_collide() {
        let mut planner = ImagePlanner::new(Path::new("imgs"), "Acme");
        let a = planner.model_path("Model X");
        let b = planner.model_path("Model_X");
        let c = planner.model_path("Model/X");
        assert_eq!(a, Path::new("imgs/Acme/Model_X.jpg"));
        assert_eq!(b, Path::new("imgs/Acme/Model_X_2.jpg"));
        assert_eq!(c, Path::new("imgs/Acme/Model_X_3.jpg"));
    }

    #[test]
    fn brands_that_sanitize_alike_get_distinct_dirs() {
        let root = Path::new("imgs");
        let spaced = ImagePlanner::new(root, "Alfa Romeo").model_path("X");
        let underscored = ImagePlanner::new(root, "Alfa_Romeo").model_path("X");
        assert_eq!(underscored, Path::new("imgs/Alfa_Romeo/X.jpg"));
        assert_ne!(spaced, underscored);
        assert!(brand_dir_name("Alfa Romeo").starts_with("Alfa_Romeo_"));
        assert_eq!(brand_dir_name("Alfa Romeo"), brand_dir_name("Alfa Romeo"));
    }

    #[test]
    fn generation_names_include_model() {
        let mut planner = ImagePlanner::new(Path::new("imgs"), "Acme");
        let a = planner.generation_path("Roadster", "Gen 1");
        let b = planner.generation_path("Coupe", "Gen 1");
        assert_eq!(a, Path::new("imgs/Acme/Roadster__Gen_1.jpg"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn writes_file_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new().image("/img.jpg", b"jpeg");
        let session = client.open_session().await.unwrap();

        let dest = dir.path().join("Acme").join("X.jpg");
        let saved = fetch_image(&session, "/img.jpg", &dest).await;
        assert_eq!(saved.as_deref(), Some(dest.as_path()));
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn failures_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new().image("/bad.jpg", b"x").fail("/bad.jpg");
        let session = client.open_session().await.unwrap();

        let dest = dir.path().join("Acme").join("X.jpg");
        assert!(fetch_image(&session, "/missing.jpg", &dest).await.is_none());
        assert!(fetch_image(&session, "/bad.jpg", &dest).await.is_none());
        assert!(!dest.exists());
    }
}
