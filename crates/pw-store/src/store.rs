use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use pw_core::{Chapter, ContentError, ContentSource, LessonContent, Page};

use crate::error::{Result, StoreError};
use crate::schema;

/// One line of the lesson listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LessonSummary {
    pub id: String,
    pub title: String,
    pub chapters: u32,
    pub pages: u32,
}

/// Lesson content kept in SQLite.
pub struct ContentStore {
    conn: Connection,
}

impl ContentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Save ---

    /// Insert or replace a lesson with all its chapters and pages.
    pub fn save_lesson(&self, lesson: &LessonContent) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO lessons (id, title, description, estimated_time, tags)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                estimated_time = excluded.estimated_time,
                tags = excluded.tags",
            params![
                lesson.id,
                lesson.title,
                lesson.description,
                lesson.estimated_time,
                serde_json::to_string(&lesson.tags)?,
            ],
        )?;
        tx.execute("DELETE FROM chapters WHERE lesson_id = ?1", [&lesson.id])?;

        for chapter in &lesson.chapters {
            tx.execute(
                "INSERT INTO chapters (lesson_id, id, title, description, estimated_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    lesson.id,
                    chapter.id,
                    chapter.title,
                    chapter.description,
                    chapter.estimated_time,
                ],
            )?;
            for (position, page) in chapter.pages.iter().enumerate() {
                save_page_on(&tx, &lesson.id, chapter.id, position, page)?;
            }
        }

        tx.commit()?;
        debug!(lesson = %lesson.id, chapters = lesson.chapters.len(), "lesson saved");
        Ok(())
    }

    // --- Load ---

    pub fn list_lessons(&self) -> Result<Vec<LessonSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.id, l.title,
                    (SELECT COUNT(*) FROM chapters c WHERE c.lesson_id = l.id),
                    (SELECT COUNT(*) FROM pages p WHERE p.lesson_id = l.id)
             FROM lessons l ORDER BY l.rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LessonSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    chapters: row.get(2)?,
                    pages: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    pub fn load_lesson(&self, lesson_id: &str) -> Result<Option<LessonContent>> {
        let header = self
            .conn
            .query_row(
                "SELECT id, title, description, estimated_time, tags FROM lessons WHERE id = ?1",
                [lesson_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, title, description, estimated_time, tags)) = header else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT id FROM chapters WHERE lesson_id = ?1 ORDER BY id")?;
        let chapter_ids: Vec<u32> = stmt
            .query_map([lesson_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let total = chapter_ids.len() as u32;
        let mut chapters = Vec::with_capacity(chapter_ids.len());
        for chapter_id in chapter_ids {
            if let Some(mut chapter) = self.load_chapter_row(lesson_id, chapter_id)? {
                chapter.total_chapters = total;
                chapters.push(chapter);
            }
        }

        Ok(Some(LessonContent {
            id,
            title,
            description,
            estimated_time,
            tags: serde_json::from_str(&tags)?,
            chapters,
        }))
    }

    /// A chapter with its pages, `total_chapters` filled in.
    pub fn load_chapter(&self, lesson_id: &str, chapter_id: u32) -> Result<Option<Chapter>> {
        let Some(mut chapter) = self.load_chapter_row(lesson_id, chapter_id)? else {
            return Ok(None);
        };
        chapter.total_chapters = self.conn.query_row(
            "SELECT COUNT(*) FROM chapters WHERE lesson_id = ?1",
            [lesson_id],
            |row| row.get(0),
        )?;
        Ok(Some(chapter))
    }

    pub fn lesson_exists(&self, lesson_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM lessons WHERE id = ?1", [lesson_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_lesson(&self, lesson_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM lessons WHERE id = ?1", [lesson_id])?;
        Ok(removed > 0)
    }

    fn load_chapter_row(&self, lesson_id: &str, chapter_id: u32) -> Result<Option<Chapter>> {
        let header = self
            .conn
            .query_row(
                "SELECT title, description, estimated_time FROM chapters
                 WHERE lesson_id = ?1 AND id = ?2",
                params![lesson_id, chapter_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((title, description, estimated_time)) = header else {
            return Ok(None);
        };

        Ok(Some(Chapter {
            id: chapter_id,
            title,
            description,
            estimated_time,
            pages: self.load_pages(lesson_id, chapter_id)?,
            total_chapters: 0,
        }))
    }

    fn load_pages(&self, lesson_id: &str, chapter_id: u32) -> Result<Vec<Page>> {
        let mut stmt = self.conn.prepare(
            "SELECT body FROM pages WHERE lesson_id = ?1 AND chapter_id = ?2 ORDER BY position",
        )?;
        stmt.query_map(params![lesson_id, chapter_id], |row| row.get::<_, String>(0))?
            .map(|r| {
                let body = r?;
                parse_page(&body)
            })
            .collect()
    }
}

fn save_page_on(
    conn: &Connection,
    lesson_id: &str,
    chapter_id: u32,
    position: usize,
    page: &Page,
) -> Result<()> {
    conn.execute(
        "INSERT INTO pages (lesson_id, chapter_id, position, page_id, kind, title, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            lesson_id,
            chapter_id,
            position as i64,
            page.id,
            page.kind.as_str(),
            page.title,
            serde_json::to_string(page)?,
        ],
    )?;
    Ok(())
}

fn parse_page(body: &str) -> Result<Page> {
    serde_json::from_str(body).map_err(|e| StoreError::InvalidData(format!("invalid page: {e}")))
}

impl ContentSource for ContentStore {
    fn lesson(&self, lesson_id: &str) -> std::result::Result<LessonContent, ContentError> {
        match self.load_lesson(lesson_id) {
            Ok(Some(lesson)) => Ok(lesson),
            Ok(None) => Err(ContentError::LessonNotFound {
                lesson_id: lesson_id.to_string(),
            }),
            Err(e) => Err(ContentError::Unavailable(e.to_string())),
        }
    }

    fn chapter(
        &self,
        lesson_id: &str,
        chapter_id: u32,
    ) -> std::result::Result<Chapter, ContentError> {
        match self.load_chapter(lesson_id, chapter_id) {
            Ok(Some(chapter)) => Ok(chapter),
            Ok(None) => match self.lesson_exists(lesson_id) {
                Ok(true) => Err(ContentError::ChapterNotFound {
                    lesson_id: lesson_id.to_string(),
                    chapter_id,
                }),
                Ok(false) => Err(ContentError::LessonNotFound {
                    lesson_id: lesson_id.to_string(),
                }),
                Err(e) => Err(ContentError::Unavailable(e.to_string())),
            },
            Err(e) => Err(ContentError::Unavailable(e.to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use pw_core::{ChapterController, NavigationCommand, Transition};

    #[test]
    fn test_save_and_load_roundtrip() {
        let store = ContentStore::open_in_memory().unwrap();
        let lesson = fixtures::lesson();
        store.save_lesson(&lesson).unwrap();

        let loaded = store.load_lesson("focus").unwrap().unwrap();
        assert_eq!(loaded.title, "Focus");
        assert_eq!(loaded.tags, ["habits"]);
        assert_eq!(loaded.chapters.len(), 2);
        assert_eq!(loaded.chapters[0].pages, lesson.chapters[0].pages);
        assert_eq!(loaded.chapters[0].total_chapters, 2);
    }

    #[test]
    fn test_resave_replaces_chapters() {
        let store = ContentStore::open_in_memory().unwrap();
        let mut lesson = fixtures::lesson();
        store.save_lesson(&lesson).unwrap();

        lesson.chapters.truncate(1);
        lesson.chapters[0].pages.truncate(1);
        store.save_lesson(&lesson).unwrap();

        let listing = store.list_lessons().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].chapters, 1);
        assert_eq!(listing[0].pages, 1);
    }

    #[test]
    fn test_list_preserves_insert_order() {
        let store = ContentStore::open_in_memory().unwrap();
        let mut b = fixtures::lesson();
        b.id = "b".to_string();
        let mut a = fixtures::lesson();
        a.id = "a".to_string();
        store.save_lesson(&b).unwrap();
        store.save_lesson(&a).unwrap();
        store.save_lesson(&b).unwrap();

        let ids: Vec<String> = store.list_lessons().unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn test_content_source_not_found() {
        let store = ContentStore::open_in_memory().unwrap();
        store.save_lesson(&fixtures::lesson()).unwrap();

        assert!(matches!(
            store.chapter("focus", 9),
            Err(ContentError::ChapterNotFound { chapter_id: 9, .. })
        ));
        assert!(matches!(
            store.chapter("nope", 1),
            Err(ContentError::LessonNotFound { .. })
        ));
        assert!(matches!(
            store.lesson("nope"),
            Err(ContentError::LessonNotFound { .. })
        ));
    }

    #[test]
    fn test_controller_reads_through_store() {
        let store = ContentStore::open_in_memory().unwrap();
        store.save_lesson(&fixtures::lesson()).unwrap();

        let mut ctl = ChapterController::open(&store, "focus", 1).unwrap();
        assert_eq!(ctl.position().total_chapters, 2);
        for _ in 0..2 {
            ctl.apply(&store, NavigationCommand::Next, 0).unwrap();
        }
        let t = ctl.apply(&store, NavigationCommand::Next, 0).unwrap();
        assert_eq!(t, Transition::ChapterChanged { chapter_id: 2 });
        assert_eq!(ctl.view().title, "Only");
    }

    #[test]
    fn test_delete_lesson_cascades() {
        let store = ContentStore::open_in_memory().unwrap();
        store.save_lesson(&fixtures::lesson()).unwrap();
        assert!(store.delete_lesson("focus").unwrap());
        assert!(!store.delete_lesson("focus").unwrap());

        let pages: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(pages, 0);
    }
}
