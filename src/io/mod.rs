//! Raster, catalog and archive I/O

pub mod raster;
pub mod inventory;
pub mod manifest;
pub mod retrieval;

pub use raster::{RasterReader, RasterWriter};
pub use inventory::{SceneInventory, SceneRecord, ConnectionConfig, PostgresInventory, JsonInventory, InventoryRow};
pub use manifest::{SceneManifest, SceneFiles, RecallEntry, recall_list};
pub use retrieval::{Retriever, RetrievalReport, ArchiveRetriever, HttpRetriever};
