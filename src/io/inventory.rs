//! Scene inventory lookup: which per-date products exist for a tile

use crate::types::{DateRange, HunterError, HunterResult, SceneDate, TileCode};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::path::{Path, PathBuf};

/// Leading catalog columns identifying one acquisition of a tile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub satellite: String,
    pub instrument: String,
    pub product: String,
    pub scene: String,
    pub date: SceneDate,
}

/// Catalog of available products
pub trait SceneInventory {
    /// All acquisitions of `tile` inside `range`. An empty answer is an error.
    fn query(&self, tile: &TileCode, range: &DateRange) -> HunterResult<Vec<SceneRecord>>;
}

fn catalog_error(tile: &TileCode, range: &DateRange, message: impl Into<String>) -> HunterError {
    HunterError::Catalog {
        tile: tile.to_string(),
        range: range.to_string(),
        message: message.into(),
    }
}

/// Explicit connection settings for the PostgreSQL scene catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Falls back to the `USER` environment variable when unset
    pub user: Option<String>,
    pub password: Option<String>,
    /// Table (optionally schema-qualified) holding one row per acquisition
    pub table: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "imagery".to_string(),
            user: None,
            password: None,
            table: "scenes".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn resolved_user(&self) -> HunterResult<String> {
        if let Some(user) = &self.user {
            return Ok(user.clone());
        }
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .map_err(|_| HunterError::Config("No catalog user configured and USER is not set".to_string()))
    }

    pub fn connect_options(&self) -> HunterResult<PgConnectOptions> {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.resolved_user()?);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }

    fn checked_table(&self) -> HunterResult<&str> {
        let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .map_err(|e| HunterError::Config(format!("Invalid identifier pattern: {}", e)))?;
        if identifier.is_match(&self.table) {
            Ok(&self.table)
        } else {
            Err(HunterError::Config(format!("Invalid catalog table name '{}'", self.table)))
        }
    }
}

/// Scene catalog in PostgreSQL, queried synchronously
pub struct PostgresInventory {
    config: ConnectionConfig,
    runtime: tokio::runtime::Runtime,
}

impl PostgresInventory {
    pub fn new(config: ConnectionConfig) -> HunterResult<Self> {
        config.checked_table()?;
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        Ok(Self { config, runtime })
    }
}

impl SceneInventory for PostgresInventory {
    fn query(&self, tile: &TileCode, range: &DateRange) -> HunterResult<Vec<SceneRecord>> {
        let sql = format!(
            "SELECT satellite, instrument, product, scene, date FROM {} \
             WHERE tile = $1 AND date BETWEEN $2 AND $3 ORDER BY date",
            self.config.checked_table()?
        );
        let options = self.config.connect_options()?;

        log::info!("Querying catalog {}:{} for tile {} ({})", self.config.host, self.config.port, tile, range);

        let rows = self
            .runtime
            .block_on(async {
                let mut conn = PgConnection::connect_with(&options).await?;
                let rows: Vec<(String, String, String, String, NaiveDate)> = sqlx::query_as(&sql)
                    .bind(tile.as_str())
                    .bind(range.start.as_naive())
                    .bind(range.end.as_naive())
                    .fetch_all(&mut conn)
                    .await?;
                conn.close().await?;
                Ok::<_, sqlx::Error>(rows)
            })
            .map_err(|e| catalog_error(tile, range, format!("query failed: {}", e)))?;

        if rows.is_empty() {
            return Err(catalog_error(tile, range, "no scenes found"));
        }

        Ok(rows
            .into_iter()
            .map(|(satellite, instrument, product, scene, date)| SceneRecord {
                satellite,
                instrument,
                product,
                scene,
                date: SceneDate::from_naive(date),
            })
            .collect())
    }
}

/// One exported catalog row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRow {
    pub tile: TileCode,
    #[serde(flatten)]
    pub record: SceneRecord,
}

/// Catalog export held in a JSON array of rows
#[derive(Debug, Clone, Default)]
pub struct JsonInventory {
    rows: Vec<InventoryRow>,
    source: Option<PathBuf>,
}

impl JsonInventory {
    pub fn from_rows(rows: Vec<InventoryRow>) -> Self {
        Self { rows, source: None }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> HunterResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let rows: Vec<InventoryRow> = serde_json::from_str(&text)
            .map_err(|e| HunterError::Config(format!("Cannot parse inventory {}: {}", path.display(), e)))?;
        log::info!("Loaded {} inventory rows from {}", rows.len(), path.display());
        Ok(Self {
            rows,
            source: Some(path.to_path_buf()),
        })
    }
}

impl SceneInventory for JsonInventory {
    fn query(&self, tile: &TileCode, range: &DateRange) -> HunterResult<Vec<SceneRecord>> {
        let mut records: Vec<SceneRecord> = self
            .rows
            .iter()
            .filter(|row| &row.tile == tile && range.contains(row.record.date))
            .map(|row| row.record.clone())
            .collect();

        if records.is_empty() {
            let origin = self
                .source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory inventory".to_string());
            return Err(catalog_error(tile, range, format!("no scenes found in {}", origin)));
        }

        records.sort_by_key(|r| r.date);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tile: &str, date: &str) -> InventoryRow {
        InventoryRow {
            tile: TileCode::parse(tile).unwrap(),
            record: SceneRecord {
                satellite: "c".to_string(),
                instrument: "f".to_string(),
                product: "msre".to_string(),
                scene: format!("t{}", tile),
                date: SceneDate::parse(date).unwrap(),
            },
        }
    }

    #[test]
    fn test_json_inventory_filters_tile_and_range() {
        let inventory = JsonInventory::from_rows(vec![
            row("55kcb", "20230105"),
            row("55kcb", "20230101"),
            row("55kcb", "20240101"),
            row("56jkt", "20230101"),
        ]);
        let range = DateRange::parse("20230101", "20231231").unwrap();

        let records = inventory.query(&TileCode::parse("55kcb").unwrap(), &range).unwrap();
        let dates: Vec<String> = records.iter().map(|r| r.date.to_string()).collect();
        assert_eq!(dates, vec!["20230101", "20230105"]);
    }

    #[test]
    fn test_empty_query_is_catalog_error() {
        let inventory = JsonInventory::from_rows(vec![row("55kcb", "20230101")]);
        let range = DateRange::parse("20220101", "20221231").unwrap();

        let err = inventory.query(&TileCode::parse("55kcb").unwrap(), &range).unwrap_err();
        assert!(matches!(err, HunterError::Catalog { .. }));
    }

    #[test]
    fn test_inventory_rows_parse_from_json() {
        let json = r#"[{"tile": "55kcb", "satellite": "c", "instrument": "f", "product": "msre",
                        "scene": "t55kcb", "date": "20230101"}]"#;
        let rows: Vec<InventoryRow> = serde_json::from_str(json).unwrap();
        assert_eq!(rows[0].record.date.to_string(), "20230101");
    }

    #[test]
    fn test_table_name_is_validated() {
        let mut config = ConnectionConfig::default();
        assert!(config.checked_table().is_ok());
        config.table = "public.scenes".to_string();
        assert!(config.checked_table().is_ok());
        config.table = "scenes; DROP TABLE scenes".to_string();
        assert!(config.checked_table().is_err());
    }
}
