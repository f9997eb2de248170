use std::fs;
use std::path::Path;

use pw_core::LessonContent;

use crate::error::{Result, StoreError};
use crate::store::ContentStore;

impl ContentStore {
    /// Import a lesson catalog (a JSON array of lessons). Returns how many
    /// lessons were written. Existing lessons with the same id are replaced.
    pub fn import_catalog_str(&self, json: &str) -> Result<usize> {
        let lessons: Vec<LessonContent> = serde_json::from_str(json)
            .map_err(|e| StoreError::InvalidData(format!("invalid catalog: {e}")))?;
        for lesson in &lessons {
            self.save_lesson(lesson)?;
        }
        Ok(lessons.len())
    }

    pub fn import_catalog_file(&self, path: &Path) -> Result<usize> {
        let json = fs::read_to_string(path).map_err(|e| {
            StoreError::InvalidData(format!("failed to read {}: {e}", path.display()))
        })?;
        self.import_catalog_str(&json)
    }

    pub fn export_catalog_string(&self) -> Result<String> {
        let mut lessons = Vec::new();
        for summary in self.list_lessons()? {
            if let Some(mut lesson) = self.load_lesson(&summary.id)? {
                // Derived on load, not part of the catalog format
                for chapter in &mut lesson.chapters {
                    chapter.total_chapters = 0;
                }
                lessons.push(lesson);
            }
        }
        Ok(serde_json::to_string_pretty(&lessons)?)
    }

    pub fn export_catalog_file(&self, path: &Path) -> Result<()> {
        let json = self.export_catalog_string()?;
        fs::write(path, json).map_err(|e| {
            StoreError::InvalidData(format!("failed to write {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures;

    const CATALOG: &str = r#"[
        {
            "id": "sleep",
            "title": "Better Sleep",
            "description": "Rest well",
            "estimatedTime": 20,
            "tags": ["health"],
            "chapters": [
                {
                    "id": 1,
                    "title": "Rhythm",
                    "estimatedTime": 10,
                    "pages": [
                        {
                            "id": 1,
                            "type": "content",
                            "title": "Circadian clock",
                            "content": ["Your body keeps time."],
                            "tip": "Get morning light",
                            "fastModeTitle": "Clock",
                            "fastModeContent": ["Body keeps time."]
                        },
                        {
                            "id": 2,
                            "type": "quiz",
                            "title": "Check",
                            "questions": [
                                {
                                    "question": "Best time for light?",
                                    "answers": ["Morning", "Midnight"],
                                    "correctAnswerIndex": 0,
                                    "explanation": "Morning light anchors the clock."
                                }
                            ]
                        }
                    ]
                }
            ]
        }
    ]"#;

    #[test]
    fn test_import_catalog() {
        let store = ContentStore::open_in_memory().unwrap();
        assert_eq!(store.import_catalog_str(CATALOG).unwrap(), 1);

        let chapter = store.load_chapter("sleep", 1).unwrap().unwrap();
        assert_eq!(chapter.pages.len(), 2);
        assert_eq!(chapter.pages[0].tip.as_deref(), Some("Get morning light"));
        assert!(chapter.pages[1].is_quiz());
        assert!(chapter.pages[1].questions[0].check(0));
    }

    #[test]
    fn test_export_then_import_elsewhere() {
        let source = ContentStore::open_in_memory().unwrap();
        source.save_lesson(&fixtures::lesson()).unwrap();
        source.import_catalog_str(CATALOG).unwrap();
        let json = source.export_catalog_string().unwrap();

        let target = ContentStore::open_in_memory().unwrap();
        assert_eq!(target.import_catalog_str(&json).unwrap(), 2);
        assert_eq!(target.list_lessons().unwrap(), source.list_lessons().unwrap());
        assert_eq!(
            target.load_lesson("focus").unwrap(),
            source.load_lesson("focus").unwrap()
        );
    }

    #[test]
    fn test_catalog_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, CATALOG).unwrap();

        let store = ContentStore::open_in_memory().unwrap();
        store.import_catalog_file(&path).unwrap();
        let out = dir.path().join("out.json");
        store.export_catalog_file(&out).unwrap();

        let exported: Vec<LessonContent> =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(exported[0].chapters[0].pages[0].title, "Circadian clock");
    }

    #[test]
    fn test_import_invalid_json() {
        let store = ContentStore::open_in_memory().unwrap();
        assert!(matches!(
            store.import_catalog_str("{not json"),
            Err(StoreError::InvalidData(_))
        ));
        assert!(store.import_catalog_file(Path::new("/nonexistent/catalog.json")).is_err());
    }
}
