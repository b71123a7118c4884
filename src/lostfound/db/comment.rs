use std::ops::DerefMut;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, Transaction};

use crate::lostfound::{Comment, CommentId, IncidentId};

#[derive(FromRow)]
struct CommentRow {
    id: CommentId,
    incident: IncidentId,
    uid: String,
    text: String,
    timestamp: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            incident: row.incident,
            uid: row.uid,
            text: row.text,
            timestamp: row.timestamp,
        }
    }
}

pub async fn store(tx: &mut Transaction<'_, Sqlite>, comment: &Comment) -> Result<()> {
    sqlx::query("INSERT INTO lf_comment (id, incident, uid, text, timestamp) VALUES (?, ?, ?, ?, ?)")
        .bind(comment.id)
        .bind(comment.incident)
        .bind(&comment.uid)
        .bind(&comment.text)
        .bind(comment.timestamp)
        .execute(tx.deref_mut())
        .await?;

    Ok(())
}

/// Loads all comments of an incident, oldest first.
pub async fn load_for_incident(tx: &mut Transaction<'_, Sqlite>, incident: IncidentId) -> Result<Vec<Comment>> {
    let rows: Vec<CommentRow> = sqlx::query_as("SELECT * FROM lf_comment WHERE incident=? ORDER BY timestamp, id")
        .bind(incident)
        .fetch_all(tx.deref_mut())
        .await?;

    Ok(rows.into_iter().map(Comment::from).collect())
}

pub async fn delete_for_incident(tx: &mut Transaction<'_, Sqlite>, incident: IncidentId) -> Result<u64> {
    let result = sqlx::query("DELETE FROM lf_comment WHERE incident=?")
        .bind(incident)
        .execute(tx.deref_mut())
        .await?;

    Ok(result.rows_affected())
}
