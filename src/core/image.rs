use crate::config::AppConfig;
use crate::core::hash::display_id_for_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// Kind of user-submitted image. Each category has its own root directory
/// holding one subdirectory per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Card,     // character panel screenshot
    Bg,       // background
    Stamina,  // stamina screenshot
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Card, Category::Bg, Category::Stamina];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Card => "card",
            Category::Bg => "bg",
            Category::Stamina => "stamina",
        }
    }

}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "card" | "panel" => Ok(Category::Card),
            "bg" | "background" => Ok(Category::Bg),
            "stamina" | "mr" => Ok(Category::Stamina),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// The (category, character) partition duplicate detection is scoped to.
/// Images in different buckets are never compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub category: Category,
    pub character: String,
    pub dir: PathBuf,
}

impl Bucket {
    pub fn images(&self, supported_formats: &[String]) -> Vec<PathBuf> {
        list_images(&self.dir, supported_formats)
    }

    pub fn find_by_display_id(&self, id: &str, supported_formats: &[String]) -> Option<PathBuf> {
        self.images(supported_formats)
            .into_iter()
            .find(|path| display_id_for_path(path) == id)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.character)
    }
}

/// List the supported image files directly inside `dir`, sorted by path.
/// A missing directory lists as empty.
pub fn list_images(dir: &Path, supported_formats: &[String]) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported(path, supported_formats))
        .collect();

    images.sort();
    images
}

pub fn is_supported(path: &Path, supported_formats: &[String]) -> bool {
    match path.extension() {
        Some(extension) => {
            let ext = extension.to_string_lossy().to_lowercase();
            supported_formats.iter().any(|f| f.eq_ignore_ascii_case(&ext))
        }
        None => false,
    }
}

/// The on-disk collection of user images: category roots under a base directory.
#[derive(Debug, Clone)]
pub struct Library {
    base_dir: PathBuf,
    roots: BTreeMap<Category, PathBuf>,
    supported_formats: Vec<String>,
}

impl Library {
    pub fn new(
        base_dir: PathBuf,
        roots: BTreeMap<Category, PathBuf>,
        supported_formats: Vec<String>,
    ) -> Self {
        Self {
            base_dir,
            roots,
            supported_formats,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.base_dir.clone(),
            config.category_roots.clone(),
            config.supported_formats.clone(),
        )
    }

    pub fn bucket(&self, category: Category, character: &str) -> Option<Bucket> {
        self.roots.get(&category).map(|root| Bucket {
            category,
            character: character.to_string(),
            dir: root.join(character),
        })
    }

    /// Every character directory under every category root.
    pub fn buckets(&self) -> Vec<Bucket> {
        let mut buckets = Vec::new();

        for (category, root) in &self.roots {
            let mut dirs: Vec<PathBuf> = WalkDir::new(root)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|entry| entry.file_type().is_dir())
                .map(|entry| entry.into_path())
                .collect();
            dirs.sort();

            for dir in dirs {
                let character = dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                buckets.push(Bucket {
                    category: *category,
                    character,
                    dir,
                });
            }
        }

        buckets
    }

    /// Category of `path` and its location relative to that category's root.
    pub fn locate(&self, path: &Path) -> Option<(Category, PathBuf)> {
        self.roots.iter().find_map(|(category, root)| {
            path.strip_prefix(root)
                .ok()
                .map(|rel| (*category, rel.to_path_buf()))
        })
    }

    /// Bucket owning `path`, if it lives in a character directory of a category root.
    pub fn bucket_of(&self, path: &Path) -> Option<Bucket> {
        let (category, rel) = self.locate(path)?;
        let mut components = rel.components();
        let character = components.next()?.as_os_str().to_string_lossy().into_owned();
        components.next()?;
        self.bucket(category, &character)
    }

    /// Look up a display id across every bucket of the library.
    pub fn find_by_display_id(&self, id: &str) -> Vec<(Bucket, PathBuf)> {
        self.buckets()
            .into_iter()
            .filter_map(|bucket| {
                bucket
                    .find_by_display_id(id, &self.supported_formats)
                    .map(|path| (bucket, path))
            })
            .collect()
    }

    /// Path relative to the base directory, with long file stems shortened
    /// to `abcd...wxyz`.
    pub fn short_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.base_dir).unwrap_or(path);

        let stem = rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let chars: Vec<char> = stem.chars().collect();
        if chars.len() <= 10 {
            return rel.to_string_lossy().into_owned();
        }

        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        let short_name = match rel.extension() {
            Some(ext) => format!("{}...{}.{}", head, tail, ext.to_string_lossy()),
            None => format!("{}...{}", head, tail),
        };

        rel.with_file_name(short_name).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::display_id;
    use std::fs;
    use tempfile::TempDir;

    fn formats() -> Vec<String> {
        vec!["jpg".to_string(), "png".to_string(), "webp".to_string()]
    }

    fn library(base: &Path) -> Library {
        let roots = Category::ALL
            .iter()
            .map(|c| (*c, base.join(c.as_str())))
            .collect();
        Library::new(base.to_path_buf(), roots, formats())
    }

    #[test]
    fn test_list_images_filters_extensions() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("b.PNG"), b"x").unwrap();
        fs::write(dir.join("a.jpg"), b"x").unwrap();
        fs::write(dir.join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.join("nested")).unwrap();
        fs::write(dir.join("nested").join("c.jpg"), b"x").unwrap();

        let images = list_images(dir, &formats());
        assert_eq!(images, vec![dir.join("a.jpg"), dir.join("b.PNG")]);
    }

    #[test]
    fn test_missing_directory_lists_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_images(&temp_dir.path().join("nope"), &formats()).is_empty());
    }

    #[test]
    fn test_buckets_and_locate() {
        let temp_dir = TempDir::new().unwrap();
        let lib = library(temp_dir.path());
        fs::create_dir_all(temp_dir.path().join("card").join("1102")).unwrap();
        fs::create_dir_all(temp_dir.path().join("bg").join("1205")).unwrap();

        let buckets = lib.buckets();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].category, Category::Card);
        assert_eq!(buckets[0].character, "1102");
        assert_eq!(buckets[1].category, Category::Bg);

        let image = temp_dir.path().join("bg").join("1205").join("x.png");
        let (category, rel) = lib.locate(&image).unwrap();
        assert_eq!(category, Category::Bg);
        assert_eq!(rel, PathBuf::from("1205").join("x.png"));

        let bucket = lib.bucket_of(&image).unwrap();
        assert_eq!(bucket.character, "1205");
        assert!(lib.locate(Path::new("/somewhere/else.png")).is_none());
    }

    #[test]
    fn test_find_by_display_id() {
        let temp_dir = TempDir::new().unwrap();
        let lib = library(temp_dir.path());
        let dir = temp_dir.path().join("stamina").join("1301");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("1301_17000.jpg"), b"x").unwrap();

        let id = display_id("1301_17000.jpg");
        let found = lib.find_by_display_id(&id);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.category, Category::Stamina);
        assert_eq!(found[0].1, dir.join("1301_17000.jpg"));
        assert!(lib.find_by_display_id("00000000").is_empty());
    }

    #[test]
    fn test_short_path() {
        let temp_dir = TempDir::new().unwrap();
        let lib = library(temp_dir.path());

        let long = temp_dir.path().join("card").join("1102").join("1102_1700000000000.jpg");
        assert_eq!(
            lib.short_path(&long),
            Path::new("card").join("1102").join("1102...0000.jpg").to_string_lossy()
        );

        let short = temp_dir.path().join("card").join("1102").join("a.jpg");
        assert_eq!(
            lib.short_path(&short),
            Path::new("card").join("1102").join("a.jpg").to_string_lossy()
        );
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("panel".parse::<Category>().unwrap(), Category::Card);
        assert_eq!("BG".parse::<Category>().unwrap(), Category::Bg);
        assert_eq!("mr".parse::<Category>().unwrap(), Category::Stamina);
        assert!("avatar".parse::<Category>().is_err());
    }
}
