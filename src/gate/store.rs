//! 门线配置解析 (GateConfigStore)
//!
//! 从存储协作方读取原始门线记录, 转换为像素坐标下的不可变 `GateSet`。
//! 单条门线解析失败只排除该门线, 不影响同摄像头的其他门线。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveTime;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{ActiveWindow, CameraId, Gate, GateSet, InboundDirection};
use crate::error::{Result, SentinelError};
use crate::geometry::Point;
use crate::storage::{GateRecord, Storage};

/// 归一化线段 `{"A": [x, y], "B": [x, y]}`
#[derive(Debug, Deserialize)]
struct NormalizedSegment {
    #[serde(rename = "A", alias = "a")]
    a: [f64; 2],
    #[serde(rename = "B", alias = "b")]
    b: [f64; 2],
}

pub struct GateConfigStore {
    storage: Arc<dyn Storage>,
    width: u32,
    height: u32,
    next_generation: AtomicU64,
}

impl GateConfigStore {
    /// `width` × `height` 为系统统一的参考分辨率
    pub fn new(storage: Arc<dyn Storage>, width: u32, height: u32) -> Self {
        Self {
            storage,
            width,
            height,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn reference_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 解析摄像头的全部门线, 每次调用生成新的快照代号
    pub fn resolve(&self, camera_id: CameraId) -> Result<GateSet> {
        let records = self.storage.gate_records(camera_id)?;
        let total = records.len();

        let gates: Vec<Gate> = records
            .iter()
            .filter_map(|record| match self.build_gate(record) {
                Ok(gate) => Some(gate),
                Err(e) => {
                    warn!(camera_id, gate_id = record.gate_id, error = %e, "门线已排除");
                    None
                }
            })
            .collect();

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        info!(
            camera_id,
            generation,
            loaded = gates.len(),
            excluded = total - gates.len(),
            "门线快照已解析"
        );
        Ok(GateSet::new(camera_id, generation, gates))
    }

    /// 单条记录 → Gate
    pub fn build_gate(&self, record: &GateRecord) -> Result<Gate> {
        let segment: NormalizedSegment = serde_json::from_str(&record.polygon_json)
            .map_err(|e| SentinelError::invalid_gate(record.gate_id, format!("坐标 JSON 无效: {e}")))?;

        let a = self.to_pixels(record, segment.a)?;
        let b = self.to_pixels(record, segment.b)?;

        let inbound = match record.direction.as_deref() {
            Some(raw) => InboundDirection::parse(raw).unwrap_or_else(|| {
                debug!(gate_id = record.gate_id, raw, "无法识别的方向, 使用 A->B");
                InboundDirection::default()
            }),
            None => InboundDirection::default(),
        };

        let window = parse_window(record)?;

        Gate::new(record.gate_id, record.camera_id, record.name.clone(), a, b, inbound, window)
    }

    fn to_pixels(&self, record: &GateRecord, [x, y]: [f64; 2]) -> Result<Point> {
        let in_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_range(x) || !in_range(y) {
            return Err(SentinelError::invalid_gate(
                record.gate_id,
                format!("归一化坐标超出范围: ({x}, {y})"),
            ));
        }
        Ok(Point::new(
            (x * self.width as f64) as f32,
            (y * self.height as f64) as f32,
        ))
    }
}

/// 时段: 缺省开始为 00:00, 缺省结束为午夜; 两者都缺省为全天
fn parse_window(record: &GateRecord) -> Result<ActiveWindow> {
    let start = parse_time(record, record.start_time.as_deref())?;
    let end = parse_time(record, record.end_time.as_deref())?;
    Ok(match (start, end) {
        (None, None) => ActiveWindow::full_day(),
        (start, end) => ActiveWindow::new(
            start.unwrap_or(NaiveTime::MIN),
            end.unwrap_or(NaiveTime::MIN),
        ),
    })
}

fn parse_time(record: &GateRecord, raw: Option<&str>) -> Result<Option<NaiveTime>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map(Some)
        .map_err(|_| SentinelError::invalid_gate(record.gate_id, format!("时段格式无效: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn record(json: &str) -> GateRecord {
        GateRecord {
            gate_id: 1,
            camera_id: 3,
            name: "front".into(),
            direction: Some("BA".into()),
            polygon_json: json.into(),
            ..Default::default()
        }
    }

    fn store_with(db: SqliteStorage) -> GateConfigStore {
        GateConfigStore::new(Arc::new(db), 1280, 720)
    }

    fn empty_store() -> GateConfigStore {
        store_with(SqliteStorage::open_in_memory().unwrap())
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn normalized_coordinates_scale_to_reference_resolution() {
        let gate = empty_store()
            .build_gate(&record(r#"{"A": [0.25, 0.5], "B": [0.75, 0.5]}"#))
            .unwrap();
        assert_eq!(gate.a(), Point::new(320.0, 360.0));
        assert_eq!(gate.b(), Point::new(960.0, 360.0));
        assert_eq!(gate.inbound(), InboundDirection::BToAInward);
        assert!(gate.window().is_full_day());
    }

    #[test]
    fn unknown_direction_defaults_to_a_to_b() {
        let mut r = record(r#"{"a": [0.1, 0.1], "b": [0.2, 0.2]}"#);
        r.direction = Some("sideways".into());
        let gate = empty_store().build_gate(&r).unwrap();
        assert_eq!(gate.inbound(), InboundDirection::AToBInward);
    }

    #[test]
    fn schedule_text_becomes_active_window() {
        let mut r = record(r#"{"A": [0.1, 0.1], "B": [0.2, 0.2]}"#);
        r.start_time = Some("22:00:00".into());
        r.end_time = Some("06:00".into());
        let window = empty_store().build_gate(&r).unwrap().window();
        assert_eq!(window.start(), hms(22, 0, 0));
        assert_eq!(window.end(), hms(6, 0, 0));

        r.end_time = None;
        let window = empty_store().build_gate(&r).unwrap().window();
        assert!(window.contains(hms(23, 59, 59)));
        assert!(!window.contains(hms(21, 0, 0)));
    }

    #[test]
    fn malformed_records_are_rejected() {
        let store = empty_store();
        for json in [
            "not json",
            r#"{"A": [0.1, 0.1]}"#,
            r#"{"A": [1.5, 0.1], "B": [0.2, 0.2]}"#,
            r#"{"A": [0.3, 0.3], "B": [0.3, 0.3]}"#,
        ] {
            assert!(store.build_gate(&record(json)).is_err(), "{json}");
        }

        let mut r = record(r#"{"A": [0.1, 0.1], "B": [0.2, 0.2]}"#);
        r.start_time = Some("25:99".into());
        assert!(store.build_gate(&r).is_err());
    }

    #[test]
    fn resolve_excludes_bad_gates_and_bumps_generation() {
        let db = SqliteStorage::open_in_memory().unwrap();
        db.insert_camera(3, "cam", "/tmp/none").unwrap();
        db.insert_gate(1, 3, "good", Some("1"), r#"{"A": [0.1, 0.5], "B": [0.9, 0.5]}"#, true)
            .unwrap();
        db.insert_gate(2, 3, "broken", None, r#"{"A": [0.5, 0.5], "B": [0.5, 0.5]}"#, true)
            .unwrap();
        db.insert_gate(3, 3, "bad-time", None, r#"{"A": [0.1, 0.1], "B": [0.9, 0.1]}"#, true)
            .unwrap();
        db.upsert_schedule(3, Some("noon"), None).unwrap();
        let store = store_with(db);

        let first = store.resolve(3).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.gates()[0].name(), "good");

        let second = store.resolve(3).unwrap();
        assert!(second.generation() > first.generation());
        assert!(store.resolve(99).unwrap().is_empty());
    }
}
