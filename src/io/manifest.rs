//! Archive file names and the (date, role) -> file mapping for one tile

use crate::io::inventory::SceneRecord;
use crate::types::{MaskKind, RasterRole, SceneDate, TileCode};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

impl SceneRecord {
    /// `{satellite}{instrument}{product}_{scene}_{date}_{token}{suffix}.img`
    pub fn file_name(&self, role: RasterRole, suffix: char) -> String {
        format!(
            "{}{}{}_{}_{}_{}{}.img",
            self.satellite,
            self.instrument,
            self.product,
            self.scene,
            self.date,
            role.file_token(),
            suffix
        )
    }
}

/// A file requested from the archive, tagged with what it is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecallEntry {
    pub date: SceneDate,
    pub role: RasterRole,
    pub name: String,
}

/// Every file needed for a tile: one water raster and three masks per record
pub fn recall_list(records: &[SceneRecord], tile: &TileCode) -> Vec<RecallEntry> {
    let suffix = tile.suffix();
    RasterRole::ALL
        .iter()
        .flat_map(|&role| {
            records.iter().map(move |record| RecallEntry {
                date: record.date,
                role,
                name: record.file_name(role, suffix),
            })
        })
        .collect()
}

/// Files available for one date
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneFiles {
    pub water: Option<PathBuf>,
    pub masks: Vec<(MaskKind, PathBuf)>,
}

/// Per-date inputs of one tile, keyed and ordered by date
#[derive(Debug, Clone)]
pub struct SceneManifest {
    tile: TileCode,
    scenes: BTreeMap<SceneDate, SceneFiles>,
}

impl SceneManifest {
    pub fn new(tile: TileCode) -> Self {
        Self {
            tile,
            scenes: BTreeMap::new(),
        }
    }

    /// Enter the recalled files that actually arrived in `dir`
    pub fn from_recall(tile: TileCode, entries: &[RecallEntry], dir: &Path, retrieved: &HashSet<String>) -> Self {
        let mut manifest = Self::new(tile);
        for entry in entries.iter().filter(|e| retrieved.contains(&e.name)) {
            manifest.insert(entry.date, entry.role, dir.join(&entry.name));
        }
        manifest
    }

    pub fn insert(&mut self, date: SceneDate, role: RasterRole, path: PathBuf) {
        let files = self.scenes.entry(date).or_default();
        match role.mask_kind() {
            Some(kind) => files.masks.push((kind, path)),
            None => {
                if let Some(existing) = &files.water {
                    log::warn!(
                        "Tile {} has a second water raster for {} ({}), keeping {}",
                        self.tile,
                        date,
                        path.display(),
                        existing.display()
                    );
                } else {
                    files.water = Some(path);
                }
            }
        }
    }

    pub fn tile(&self) -> &TileCode {
        &self.tile
    }

    pub fn get(&self, date: SceneDate) -> Option<&SceneFiles> {
        self.scenes.get(&date)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SceneDate, &SceneFiles)> {
        self.scenes.iter()
    }

    pub fn dates(&self) -> Vec<SceneDate> {
        self.scenes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str) -> SceneRecord {
        SceneRecord {
            satellite: "c".to_string(),
            instrument: "f".to_string(),
            product: "msre".to_string(),
            scene: "t55kcb".to_string(),
            date: SceneDate::parse(date).unwrap(),
        }
    }

    #[test]
    fn test_file_names_follow_archive_convention() {
        let r = record("20230101");
        assert_eq!(r.file_name(RasterRole::Water, 'k'), "cfmsre_t55kcb_20230101_waterk.img");
        assert_eq!(r.file_name(RasterRole::TopoShadow, 'k'), "cfmsre_t55kcb_20230101_toposhadowmk.img");
    }

    #[test]
    fn test_recall_list_has_four_roles_per_record() {
        let tile = TileCode::parse("55kcb").unwrap();
        let entries = recall_list(&[record("20230101"), record("20230111")], &tile);
        assert_eq!(entries.len(), 8);
        assert_eq!(entries[0].role, RasterRole::Water);
        assert_eq!(entries[7].role, RasterRole::TopoShadow);
        assert!(entries.iter().all(|e| e.name.ends_with("k.img")));
    }

    #[test]
    fn test_manifest_keeps_only_retrieved_files() {
        let tile = TileCode::parse("55kcb").unwrap();
        let entries = recall_list(&[record("20230101"), record("20230111")], &tile);
        let retrieved: HashSet<String> = entries
            .iter()
            .filter(|e| !(e.role == RasterRole::Water && e.date.to_string() == "20230111"))
            .filter(|e| e.role != RasterRole::CloudShadow)
            .map(|e| e.name.clone())
            .collect();

        let manifest = SceneManifest::from_recall(tile, &entries, Path::new("/recall"), &retrieved);
        let first = manifest.get(SceneDate::parse("20230101").unwrap()).unwrap();
        assert!(first.water.is_some());
        assert_eq!(
            first.masks.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec![MaskKind::Cloud, MaskKind::TopoShadow]
        );

        let second = manifest.get(SceneDate::parse("20230111").unwrap()).unwrap();
        assert!(second.water.is_none());
    }

    #[test]
    fn test_duplicate_water_keeps_first() {
        let mut manifest = SceneManifest::new(TileCode::parse("55kcb").unwrap());
        let date = SceneDate::parse("20230101").unwrap();
        manifest.insert(date, RasterRole::Water, PathBuf::from("a.img"));
        manifest.insert(date, RasterRole::Water, PathBuf::from("b.img"));
        assert_eq!(manifest.get(date).unwrap().water, Some(PathBuf::from("a.img")));
    }
}
