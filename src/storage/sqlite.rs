//! SQLite 存储实现
//!
//! 表结构与管理端共用: cameras / gates / func_schedules / events

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{CameraRecord, GateRecord, Storage, StoredEvent};
use crate::engine::{CrossingEvent, TIMESTAMP_FORMAT};
use crate::error::Result;
use crate::gate::{CameraId, GateId};

/// 进出管控在 func_schedules 中的功能类型
pub const IN_OUT_FUNCTION: &str = "in_out_control";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cameras (
        camera_id INTEGER PRIMARY KEY,
        camera_name TEXT NOT NULL DEFAULT '',
        camera_url TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS gates (
        gate_id INTEGER PRIMARY KEY,
        camera_id INTEGER NOT NULL,
        gate_name TEXT NOT NULL,
        direction TEXT,
        polygon_json TEXT NOT NULL,
        in_out_control_mode INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (camera_id) REFERENCES cameras(camera_id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_gates_camera ON gates(camera_id);
    CREATE TABLE IF NOT EXISTS func_schedules (
        schedule_id INTEGER PRIMARY KEY AUTOINCREMENT,
        gate_id INTEGER NOT NULL,
        function_type TEXT NOT NULL,
        start_time TEXT,
        end_time TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        FOREIGN KEY (gate_id) REFERENCES gates(gate_id) ON DELETE CASCADE
    );
    CREATE TABLE IF NOT EXISTS events (
        event_id INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id INTEGER NOT NULL,
        gate_id INTEGER NOT NULL,
        track_id INTEGER,
        event_type TEXT NOT NULL,
        alert_level TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// 打开 (或创建) 数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "数据库已打开");
        Self::with_connection(conn)
    }

    /// 内存数据库 (测试 / 演示)
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert_camera(&self, camera_id: CameraId, name: &str, url: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO cameras (camera_id, camera_name, camera_url) VALUES (?1, ?2, ?3)",
            params![camera_id, name, url],
        )?;
        Ok(())
    }

    /// 新增或更新门线, `enabled` 对应进出管控开关
    pub fn insert_gate(
        &self,
        gate_id: GateId,
        camera_id: CameraId,
        name: &str,
        direction: Option<&str>,
        polygon_json: &str,
        enabled: bool,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO gates
                 (gate_id, camera_id, gate_name, direction, polygon_json, in_out_control_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![gate_id, camera_id, name, direction, polygon_json, enabled as i64],
        )?;
        Ok(())
    }

    pub fn set_gate_enabled(&self, gate_id: GateId, enabled: bool) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE gates SET in_out_control_mode = ?1 WHERE gate_id = ?2",
            params![enabled as i64, gate_id],
        )?;
        Ok(())
    }

    pub fn delete_gate(&self, gate_id: GateId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM func_schedules WHERE gate_id = ?1", params![gate_id])?;
        conn.execute("DELETE FROM gates WHERE gate_id = ?1", params![gate_id])?;
        Ok(())
    }

    /// 设置门线的进出管控时段 (替换已有的启用时段)
    pub fn upsert_schedule(
        &self,
        gate_id: GateId,
        start_time: Option<&str>,
        end_time: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE func_schedules SET is_active = 0 WHERE gate_id = ?1 AND function_type = ?2",
            params![gate_id, IN_OUT_FUNCTION],
        )?;
        tx.execute(
            "INSERT INTO func_schedules (gate_id, function_type, start_time, end_time, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![gate_id, IN_OUT_FUNCTION, start_time, end_time],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn camera(&self, camera_id: CameraId) -> Result<Option<CameraRecord>> {
        let conn = self.conn.lock();
        let camera = conn
            .query_row(
                "SELECT camera_id, camera_name, camera_url FROM cameras WHERE camera_id = ?1",
                params![camera_id],
                |row| {
                    Ok(CameraRecord {
                        camera_id: row.get(0)?,
                        name: row.get(1)?,
                        url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(camera)
    }
}

impl Storage for SqliteStorage {
    fn list_cameras(&self) -> Result<Vec<CameraRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT camera_id, camera_name, camera_url FROM cameras ORDER BY camera_id",
        )?;
        let cameras = stmt
            .query_map([], |row| {
                Ok(CameraRecord {
                    camera_id: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cameras)
    }

    fn gate_records(&self, camera_id: CameraId) -> Result<Vec<GateRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT g.gate_id, g.camera_id, g.gate_name, g.direction, g.polygon_json,
                    s.start_time, s.end_time
             FROM gates g
             LEFT JOIN func_schedules s
               ON g.gate_id = s.gate_id AND s.function_type = ?2 AND s.is_active = 1
             WHERE g.camera_id = ?1 AND g.in_out_control_mode = 1
             ORDER BY g.gate_id, s.schedule_id DESC",
        )?;
        let rows = stmt
            .query_map(params![camera_id, IN_OUT_FUNCTION], |row| {
                Ok(GateRecord {
                    gate_id: row.get(0)?,
                    camera_id: row.get(1)?,
                    name: row.get(2)?,
                    direction: row.get(3)?,
                    polygon_json: row.get(4)?,
                    start_time: row.get(5)?,
                    end_time: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // 同一门线存在多条启用时段时只保留最新一条
        let mut records: Vec<GateRecord> = Vec::with_capacity(rows.len());
        for row in rows {
            if records.last().map(|r| r.gate_id) != Some(row.gate_id) {
                records.push(row);
            }
        }
        debug!(camera_id, count = records.len(), "读取门线记录");
        Ok(records)
    }

    fn insert_event(&self, event: &CrossingEvent) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO events (camera_id, gate_id, track_id, event_type, alert_level, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.camera_id,
                event.gate_id,
                event.track_id as i64,
                event.kind.as_str(),
                event.alert.as_str(),
                event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, camera_id, gate_id, track_id, event_type, alert_level, timestamp
             FROM events ORDER BY timestamp DESC, event_id DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit as i64], |row| {
                Ok(StoredEvent {
                    event_id: row.get(0)?,
                    camera_id: row.get(1)?,
                    gate_id: row.get(2)?,
                    track_id: row.get(3)?,
                    event_type: row.get(4)?,
                    alert_level: row.get(5)?,
                    timestamp: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AlertLevel, CrossingDirection, EventKind};
    use chrono::NaiveDate;

    const SEGMENT: &str = r#"{"A": [0.1, 0.5], "B": [0.9, 0.5]}"#;

    fn seeded() -> SqliteStorage {
        let db = SqliteStorage::open_in_memory().unwrap();
        db.insert_camera(1, "lobby", "/data/lobby").unwrap();
        db.insert_camera(2, "dock", "rtsp://dock").unwrap();
        db.insert_gate(10, 1, "front", Some("ATOB"), SEGMENT, true).unwrap();
        db.insert_gate(11, 1, "side", None, SEGMENT, false).unwrap();
        db.insert_gate(20, 2, "dock", Some("-1"), SEGMENT, true).unwrap();
        db
    }

    #[test]
    fn lists_cameras_in_id_order() {
        let db = seeded();
        let cams = db.list_cameras().unwrap();
        assert_eq!(cams.len(), 2);
        assert_eq!(cams[0].camera_id, 1);
        assert_eq!(cams[1].url, "rtsp://dock");
        assert_eq!(db.camera(2).unwrap().map(|c| c.name), Some("dock".to_string()));
        assert!(db.camera(9).unwrap().is_none());
    }

    #[test]
    fn gate_records_only_include_enabled_gates() {
        let db = seeded();
        let gates = db.gate_records(1).unwrap();
        assert_eq!(gates.len(), 1);
        assert_eq!(gates[0].gate_id, 10);
        assert_eq!(gates[0].direction.as_deref(), Some("ATOB"));
        assert_eq!(gates[0].start_time, None);

        db.set_gate_enabled(11, true).unwrap();
        assert_eq!(db.gate_records(1).unwrap().len(), 2);
    }

    #[test]
    fn latest_active_schedule_wins() {
        let db = seeded();
        db.upsert_schedule(10, Some("08:00:00"), Some("18:00:00")).unwrap();
        db.upsert_schedule(10, Some("22:00:00"), Some("06:00:00")).unwrap();
        let gates = db.gate_records(1).unwrap();
        assert_eq!(gates.len(), 1);
        assert_eq!(gates[0].start_time.as_deref(), Some("22:00:00"));
        assert_eq!(gates[0].end_time.as_deref(), Some("06:00:00"));
    }

    #[test]
    fn deleted_gate_disappears() {
        let db = seeded();
        db.upsert_schedule(20, Some("01:00"), None).unwrap();
        db.delete_gate(20).unwrap();
        assert!(db.gate_records(2).unwrap().is_empty());
    }

    #[test]
    fn events_round_trip_newest_first() {
        let db = seeded();
        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        for (i, hour) in [9, 23].into_iter().enumerate() {
            db.insert_event(&CrossingEvent {
                camera_id: 1,
                gate_id: 10,
                gate_name: "front".into(),
                track_id: i as u32 + 1,
                kind: EventKind::Entry,
                direction: CrossingDirection::AToB,
                alert: AlertLevel::Light,
                timestamp: day.and_hms_opt(hour, 0, 0).unwrap(),
            })
            .unwrap();
        }
        let events = db.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].track_id, Some(2));
        assert_eq!(events[0].event_type, "entry");
        assert_eq!(events[0].alert_level, "light");
        assert!(events[0].timestamp.starts_with("2025-03-01 23:00:00"));
        assert_eq!(db.recent_events(1).unwrap().len(), 1);
    }
}
