//! Category directory operations

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{Category, CategoryId};
use crate::store::CategoryDirectory;

impl Database {
    /// Create a category, or return the existing one with the same name
    pub fn upsert_category(&self, name: &str) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidData("category name is empty".to_string()));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO categories (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;

        let category = conn.query_row(
            "SELECT id, name FROM categories WHERE name = ?",
            params![name],
            |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )?;
        Ok(category)
    }

    pub fn get_category(&self, id: CategoryId) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT id, name FROM categories WHERE id = ?",
                params![id],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(category)
    }

    pub fn list_all_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY id")?;
        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Case-insensitive existence check
    pub fn has_category_named(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM categories WHERE name = ?",
                params![name.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl CategoryDirectory for Database {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        self.blocking(|db| db.list_all_categories()).await
    }

    async fn category_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.blocking(move |db| db.has_category_named(&name)).await
    }
}
