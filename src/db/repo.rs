use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{info, instrument};

use super::model::{EffectChange, EffectUpdate, NewEffect, SettingsUpdate};
use super::StoreError;
use crate::model::{CaptureSettings, Effect, Orientation, Settings, MAX_ENABLED_EFFECTS};

pub type Pool = SqlitePool;
type StoreResult<T> = Result<T, StoreError>;

pub async fn init_pool(database_url: &str) -> anyhow::Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the parent
/// directory exists. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// Derive an effect id from its display name, e.g. `"Studio Ghibli!"` -> `"studio-ghibli"`.
pub fn slugify(name: &str) -> String {
    SLUG_RE
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

fn effect_from_row(row: &SqliteRow) -> Effect {
    Effect {
        id: row.get("id"),
        name: row.get("name"),
        prompt: row.get("prompt"),
        enabled: row.get("enabled"),
    }
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "effect",
        id: id.to_string(),
    }
}

#[instrument(skip_all)]
pub async fn get_settings(pool: &Pool) -> StoreResult<Settings> {
    let row = sqlx::query(
        "SELECT orientation, capture_interval, countdown_duration, photo_count, flash_enabled, \
         sound_enabled, preview_time, retake_allowed, max_retakes FROM settings WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;

    let orientation: String = row.get("orientation");
    Ok(Settings {
        orientation: Orientation::parse(&orientation).unwrap_or_default(),
        effects: list_effects(pool).await?,
        capture_interval: row.get::<i64, _>("capture_interval") as u32,
        countdown_duration: row.get::<i64, _>("countdown_duration") as u32,
        photo_count: row.get::<i64, _>("photo_count") as u32,
        capture_settings: CaptureSettings {
            flash_enabled: row.get("flash_enabled"),
            sound_enabled: row.get("sound_enabled"),
            preview_time: row.get::<i64, _>("preview_time") as u32,
            retake_allowed: row.get("retake_allowed"),
            max_retakes: row.get::<i64, _>("max_retakes") as u32,
        },
    })
}

#[instrument(skip_all)]
pub async fn update_settings(pool: &Pool, update: &SettingsUpdate) -> StoreResult<Settings> {
    update.validate()?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE settings SET \
         orientation = COALESCE(?, orientation), \
         capture_interval = COALESCE(?, capture_interval), \
         countdown_duration = COALESCE(?, countdown_duration), \
         photo_count = COALESCE(?, photo_count), \
         updated_at = CURRENT_TIMESTAMP \
         WHERE id = 1",
    )
    .bind(update.orientation.map(|o| o.as_str()))
    .bind(update.capture_interval.map(i64::from))
    .bind(update.countdown_duration.map(i64::from))
    .bind(update.photo_count.map(i64::from))
    .execute(&mut *tx)
    .await?;

    if let Some(cs) = &update.capture_settings {
        write_capture_settings(&mut tx, cs).await?;
    }

    if let Some(effects) = &update.effects {
        sqlx::query("DELETE FROM effects").execute(&mut *tx).await?;
        let mut enabled_seq = 0_i64;
        for e in effects {
            let seq = if e.enabled {
                enabled_seq += 1;
                Some(enabled_seq)
            } else {
                None
            };
            sqlx::query(
                "INSERT INTO effects (id, name, prompt, enabled, enabled_seq) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&e.id)
            .bind(&e.name)
            .bind(&e.prompt)
            .bind(e.enabled)
            .bind(seq)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    info!("settings updated");
    get_settings(pool).await
}

async fn write_capture_settings(
    tx: &mut Transaction<'_, Sqlite>,
    cs: &CaptureSettings,
) -> StoreResult<()> {
    sqlx::query(
        "UPDATE settings SET flash_enabled = ?, sound_enabled = ?, preview_time = ?, \
         retake_allowed = ?, max_retakes = ?, updated_at = CURRENT_TIMESTAMP WHERE id = 1",
    )
    .bind(cs.flash_enabled)
    .bind(cs.sound_enabled)
    .bind(i64::from(cs.preview_time))
    .bind(cs.retake_allowed)
    .bind(i64::from(cs.max_retakes))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Restore orientation, timing and capture settings to their defaults.
/// The effect catalogue is left alone.
#[instrument(skip_all)]
pub async fn reset_settings(pool: &Pool) -> StoreResult<Settings> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE settings SET orientation = ?, capture_interval = 3, countdown_duration = 3, \
         photo_count = 3, updated_at = CURRENT_TIMESTAMP WHERE id = 1",
    )
    .bind(Orientation::default().as_str())
    .execute(&mut *tx)
    .await?;
    write_capture_settings(&mut tx, &CaptureSettings::default()).await?;
    tx.commit().await?;
    get_settings(pool).await
}

#[instrument(skip_all)]
pub async fn list_effects(pool: &Pool) -> StoreResult<Vec<Effect>> {
    let rows = sqlx::query("SELECT id, name, prompt, enabled FROM effects ORDER BY seq")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(effect_from_row).collect())
}

/// Enabled effects in catalogue order, the same order `Settings::enabled_effects`
/// yields. Enable order only decides eviction.
#[instrument(skip_all)]
pub async fn enabled_effects(pool: &Pool) -> StoreResult<Vec<Effect>> {
    let rows = sqlx::query(
        "SELECT id, name, prompt, enabled FROM effects WHERE enabled = 1 ORDER BY seq",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(effect_from_row).collect())
}

#[instrument(skip_all)]
pub async fn get_effect(pool: &Pool, id: &str) -> StoreResult<Effect> {
    let row = sqlx::query("SELECT id, name, prompt, enabled FROM effects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(effect_from_row).ok_or_else(|| not_found(id))
}

#[instrument(skip_all)]
pub async fn create_effect(pool: &Pool, new: &NewEffect) -> StoreResult<EffectChange> {
    new.validate()?;
    let id = match &new.id {
        Some(id) => id.trim().to_string(),
        None => slugify(&new.name),
    };
    if id.is_empty() {
        return Err(StoreError::Validation(
            "effect id could not be derived from name".into(),
        ));
    }

    let mut tx = pool.begin().await?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT seq FROM effects WHERE id = ?")
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_some() {
        return Err(StoreError::Validation(format!("effect '{id}' already exists")));
    }

    sqlx::query("INSERT INTO effects (id, name, prompt, enabled) VALUES (?, ?, ?, 0)")
        .bind(&id)
        .bind(new.name.trim())
        .bind(new.prompt.trim())
        .execute(&mut *tx)
        .await?;

    let evicted = if new.enabled {
        enable_tx(&mut tx, &id).await?
    } else {
        None
    };
    tx.commit().await?;

    info!(id, enabled = new.enabled, ?evicted, "effect created");
    Ok(EffectChange {
        effect: get_effect(pool, &id).await?,
        evicted,
    })
}

#[instrument(skip_all)]
pub async fn update_effect(pool: &Pool, id: &str, update: &EffectUpdate) -> StoreResult<EffectChange> {
    update.validate()?;

    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "UPDATE effects SET name = COALESCE(?, name), prompt = COALESCE(?, prompt), \
         updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(update.name.as_deref().map(str::trim))
    .bind(update.prompt.as_deref().map(str::trim))
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        return Err(not_found(id));
    }

    let evicted = match update.enabled {
        Some(true) => enable_tx(&mut tx, id).await?,
        Some(false) => {
            disable_tx(&mut tx, id).await?;
            None
        }
        None => None,
    };
    tx.commit().await?;

    Ok(EffectChange {
        effect: get_effect(pool, id).await?,
        evicted,
    })
}

/// Enable or disable an effect. Enabling while the cap is reached disables
/// the effect that was enabled earliest, in the same transaction.
#[instrument(skip_all)]
pub async fn set_effect_enabled(pool: &Pool, id: &str, enabled: bool) -> StoreResult<EffectChange> {
    let mut tx = pool.begin().await?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT seq FROM effects WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(not_found(id));
    }

    let evicted = if enabled {
        enable_tx(&mut tx, id).await?
    } else {
        disable_tx(&mut tx, id).await?;
        None
    };
    tx.commit().await?;

    if let Some(old) = &evicted {
        info!(enabled = id, evicted = %old, "effect cap reached; rotated oldest out");
    }
    Ok(EffectChange {
        effect: get_effect(pool, id).await?,
        evicted,
    })
}

async fn enable_tx(tx: &mut Transaction<'_, Sqlite>, id: &str) -> StoreResult<Option<String>> {
    let already: bool = sqlx::query_scalar("SELECT enabled FROM effects WHERE id = ?")
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
    if already {
        return Ok(None);
    }

    let mut evicted = None;
    loop {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM effects WHERE enabled = 1")
            .fetch_one(&mut **tx)
            .await?;
        if (count as usize) < MAX_ENABLED_EFFECTS {
            break;
        }
        let oldest: String = sqlx::query_scalar(
            "SELECT id FROM effects WHERE enabled = 1 ORDER BY enabled_seq, seq LIMIT 1",
        )
        .fetch_one(&mut **tx)
        .await?;
        disable_tx(tx, &oldest).await?;
        evicted = Some(oldest);
    }

    let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(enabled_seq), 0) + 1 FROM effects")
        .fetch_one(&mut **tx)
        .await?;
    sqlx::query(
        "UPDATE effects SET enabled = 1, enabled_seq = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(next_seq)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(evicted)
}

async fn disable_tx(tx: &mut Transaction<'_, Sqlite>, id: &str) -> StoreResult<()> {
    sqlx::query(
        "UPDATE effects SET enabled = 0, enabled_seq = NULL, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_effect(pool: &Pool, id: &str) -> StoreResult<()> {
    let res = sqlx::query("DELETE FROM effects WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(not_found(id));
    }
    info!(id, "effect deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_names() {
        assert_eq!(slugify("Studio Ghibli!"), "studio-ghibli");
        assert_eq!(slugify("  Pixar 3D "), "pixar-3d");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("nested").join("booth.db");
        let url = format!("sqlite://{}?mode=rwc", file.display());
        assert_eq!(prepare_sqlite_url(&url), url);
        assert!(file.parent().unwrap().exists());
    }
}
