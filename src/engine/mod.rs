//! 越线判定引擎 (GateEngine)
//!
//! 每帧输入: 摄像头当前门线快照 + 跟踪目标列表
//! 每帧输出: 0..N 个越线事件
//!
//! 状态按 (门线, 目标) 保存, 由工作线程独占, 无需加锁。

pub mod event;

pub use event::{AlertLevel, CrossingDirection, CrossingEvent, EventKind, OpposingKind, TIMESTAMP_FORMAT};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::detection::types::{Detection, TrackId};
use crate::gate::{CameraId, Gate, GateId, GateSet};
use crate::geometry::{self, Point};

/// 帧时钟: 单调时间用于冷却与闲置判断, 墙钟用于时段与事件时间戳
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    pub instant: Instant,
    pub wall: NaiveDateTime,
}

impl FrameClock {
    pub fn new(instant: Instant, wall: NaiveDateTime) -> Self {
        Self { instant, wall }
    }

    pub fn now() -> Self {
        Self::new(Instant::now(), chrono::Local::now().naive_local())
    }
}

/// (门线, 目标) 跟踪状态
#[derive(Debug, Clone)]
struct TrackState {
    /// -1 / +1, 0 表示尚未观测
    side: i8,
    anchor: Point,
    last_event: Option<Instant>,
    last_seen: Instant,
}

/// 门线高亮标记
#[derive(Debug, Clone, Copy)]
struct Flash {
    kind: EventKind,
    until: Instant,
}

pub struct GateEngine {
    camera_id: CameraId,
    config: EngineConfig,
    states: HashMap<(GateId, TrackId), TrackState>,
    flashes: HashMap<GateId, Flash>,
    snapshot: Option<Arc<GateSet>>,
}

impl GateEngine {
    pub fn new(camera_id: CameraId, config: EngineConfig) -> Self {
        Self {
            camera_id,
            config,
            states: HashMap::new(),
            flashes: HashMap::new(),
            snapshot: None,
        }
    }

    /// 当前保存的 (门线, 目标) 状态数
    pub fn tracked_pairs(&self) -> usize {
        self.states.len()
    }

    pub fn has_state(&self, gate_id: GateId, track_id: TrackId) -> bool {
        self.states.contains_key(&(gate_id, track_id))
    }

    /// 处理一帧
    pub fn process(
        &mut self,
        gates: &Arc<GateSet>,
        detections: &[Detection],
        clock: &FrameClock,
    ) -> Vec<CrossingEvent> {
        self.observe_snapshot(gates);

        let mut events = Vec::new();
        for gate in gates.gates() {
            for detection in detections {
                if let Some(event) = self.evaluate(gate, detection, clock) {
                    events.push(event);
                }
            }
        }

        self.evict_idle(clock.instant);
        events
    }

    /// 门线当前的高亮类型 (未过期时)
    pub fn flash(&self, gate_id: GateId, now: Instant) -> Option<EventKind> {
        self.flashes
            .get(&gate_id)
            .filter(|f| f.until > now)
            .map(|f| f.kind)
    }

    /// 清空所有状态 (视频源回绕时调用)
    pub fn reset(&mut self) {
        self.states.clear();
        self.flashes.clear();
    }

    fn evaluate(
        &mut self,
        gate: &Gate,
        detection: &Detection,
        clock: &FrameClock,
    ) -> Option<CrossingEvent> {
        let now = clock.instant;
        let anchor = detection.anchor;
        let (a, b) = (gate.a(), gate.b());

        let state = self
            .states
            .entry((gate.id(), detection.track_id))
            .or_insert(TrackState {
                side: 0,
                anchor,
                last_event: None,
                last_seen: now,
            });

        let previous = state.side;
        let previous_anchor = state.anchor;
        let current = match geometry::side(a, b, anchor) {
            0 => previous,
            s => s,
        };

        let mut accepted = None;
        let near = geometry::distance_to_segment(anchor, a, b) <= self.config.near_line_px;
        if let (true, Some(direction)) = (near, CrossingDirection::from_sides(previous, current)) {
            let cooling = state
                .last_event
                .is_some_and(|t| now.saturating_duration_since(t) < self.config.cooldown());
            let normal_move = anchor
                .sub(previous_anchor)
                .dot(geometry::unit_normal(a, b))
                .abs();

            if cooling {
                debug!(gate_id = gate.id(), track_id = detection.track_id, "冷却中, 忽略越线");
            } else if normal_move < self.config.min_normal_move_px {
                debug!(
                    gate_id = gate.id(),
                    track_id = detection.track_id,
                    normal_move,
                    "法向位移过小, 忽略越线"
                );
            } else {
                state.last_event = Some(now);
                accepted = Some(direction);
            }
        }

        state.side = current;
        state.anchor = anchor;
        state.last_seen = now;

        let direction = accepted?;
        let kind = self.classify(gate, direction);
        let alert = if gate.window().contains(clock.wall.time()) {
            AlertLevel::Heavy
        } else {
            AlertLevel::Light
        };

        self.flashes.insert(
            gate.id(),
            Flash {
                kind,
                until: now + self.config.flash_duration(),
            },
        );

        info!(
            camera_id = self.camera_id,
            gate_id = gate.id(),
            gate = gate.name(),
            track_id = detection.track_id,
            direction = direction.as_str(),
            kind = kind.as_str(),
            alert = alert.as_str(),
            "越线事件"
        );

        Some(CrossingEvent {
            camera_id: self.camera_id,
            gate_id: gate.id(),
            gate_name: gate.name().to_string(),
            track_id: detection.track_id,
            kind,
            direction,
            alert,
            timestamp: clock.wall,
        })
    }

    fn classify(&self, gate: &Gate, direction: CrossingDirection) -> EventKind {
        use crate::gate::InboundDirection::*;

        if !self.config.classify_direction {
            return EventKind::GenericCross;
        }
        match (direction, gate.inbound()) {
            (CrossingDirection::AToB, AToBInward) | (CrossingDirection::BToA, BToAInward) => {
                EventKind::Entry
            }
            _ => self.config.opposing_kind.into(),
        }
    }

    /// 新快照: 删除已消失或几何改变的门线的状态
    fn observe_snapshot(&mut self, gates: &Arc<GateSet>) {
        if let Some(current) = &self.snapshot {
            if Arc::ptr_eq(current, gates) || current.generation() == gates.generation() {
                return;
            }
            let unchanged = |gate_id: GateId| match (current.get(gate_id), gates.get(gate_id)) {
                (Some(old), Some(new)) => old.same_geometry(new),
                _ => false,
            };
            let before = self.states.len();
            self.states.retain(|(gate_id, _), _| unchanged(*gate_id));
            self.flashes.retain(|gate_id, _| gates.get(*gate_id).is_some());
            debug!(
                camera_id = self.camera_id,
                generation = gates.generation(),
                dropped = before - self.states.len(),
                "门线快照已切换"
            );
        }
        self.snapshot = Some(Arc::clone(gates));
    }

    fn evict_idle(&mut self, now: Instant) {
        let idle = self.config.idle_timeout();
        let cooldown = self.config.cooldown();
        // 冷却未结束的状态保留, 目标短暂消失后重现也不会绕过冷却
        self.states.retain(|_, s| {
            now.saturating_duration_since(s.last_seen) <= idle
                || s.last_event
                    .is_some_and(|t| now.saturating_duration_since(t) < cooldown)
        });
        self.flashes.retain(|_, f| f.until > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;
    use crate::gate::{ActiveWindow, InboundDirection};
    use chrono::{NaiveDate, NaiveTime};
    use std::time::Duration;

    const A: Point = Point::new(50.0, 50.0);
    const B: Point = Point::new(150.0, 50.0);

    fn gate(id: GateId, inbound: InboundDirection, window: ActiveWindow) -> Gate {
        Gate::new(id, 1, format!("gate-{id}"), A, B, inbound, window).unwrap()
    }

    fn set(generation: u64, gates: Vec<Gate>) -> Arc<GateSet> {
        Arc::new(GateSet::new(1, generation, gates))
    }

    fn person(track_id: TrackId, x: f32, y: f32) -> Detection {
        let bbox = BBox {
            x1: x - 10.0,
            y1: y - 60.0,
            x2: x + 10.0,
            y2: y,
            confidence: 0.9,
            class_id: 0,
        };
        Detection::new(track_id, bbox, None, false)
    }

    struct Clock {
        base: Instant,
        day: NaiveDate,
        time: NaiveTime,
    }

    impl Clock {
        fn at(hour: u32) -> Self {
            Self {
                base: Instant::now(),
                day: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            }
        }

        fn ms(&self, offset: u64) -> FrameClock {
            FrameClock::new(
                self.base + Duration::from_millis(offset),
                self.day.and_time(self.time),
            )
        }
    }

    #[test]
    fn oscillation_within_cooldown_yields_one_event() {
        let mut engine = GateEngine::new(1, EngineConfig::default());
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);
        let clock = Clock::at(12);

        let mut total = 0;
        for (i, y) in [60.0, 40.0, 60.0, 40.0].into_iter().enumerate() {
            total += engine
                .process(&gates, &[person(7, 100.0, y)], &clock.ms(i as u64 * 100))
                .len();
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn crossing_after_cooldown_is_accepted_again() {
        let mut engine = GateEngine::new(1, EngineConfig::default());
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);
        let clock = Clock::at(12);

        engine.process(&gates, &[person(7, 100.0, 40.0)], &clock.ms(0));
        assert_eq!(engine.process(&gates, &[person(7, 100.0, 60.0)], &clock.ms(100)).len(), 1);
        assert_eq!(engine.process(&gates, &[person(7, 100.0, 40.0)], &clock.ms(700)).len(), 1);
    }

    #[test]
    fn end_to_end_entry_with_window_alert() {
        let night = ActiveWindow::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        );
        for (hour, expected) in [(23, AlertLevel::Heavy), (2, AlertLevel::Heavy), (12, AlertLevel::Light)] {
            let mut engine = GateEngine::new(1, EngineConfig::default());
            let gates = set(1, vec![gate(5, InboundDirection::AToBInward, night)]);
            let clock = Clock::at(hour);

            assert!(engine.process(&gates, &[person(3, 100.0, 40.0)], &clock.ms(0)).is_empty());
            let events = engine.process(&gates, &[person(3, 100.0, 60.0)], &clock.ms(40));
            assert_eq!(events.len(), 1);
            let event = &events[0];
            assert_eq!(event.kind, EventKind::Entry);
            assert_eq!(event.direction, CrossingDirection::AToB);
            assert_eq!(event.alert, expected, "hour {hour}");
            assert_eq!(event.gate_id, 5);
            assert_eq!(event.track_id, 3);
            assert_eq!(engine.flash(5, clock.ms(100).instant), Some(EventKind::Entry));
            assert_eq!(engine.flash(5, clock.ms(2000).instant), None);
        }
    }

    #[test]
    fn opposing_direction_uses_configured_label() {
        let clock = Clock::at(12);
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);

        let mut engine = GateEngine::new(1, EngineConfig::default());
        engine.process(&gates, &[person(1, 100.0, 60.0)], &clock.ms(0));
        let events = engine.process(&gates, &[person(1, 100.0, 40.0)], &clock.ms(40));
        assert_eq!(events[0].kind, EventKind::Invasion);
        assert_eq!(events[0].direction, CrossingDirection::BToA);

        let config = EngineConfig {
            opposing_kind: OpposingKind::Exit,
            ..Default::default()
        };
        let mut engine = GateEngine::new(1, config);
        engine.process(&gates, &[person(1, 100.0, 60.0)], &clock.ms(0));
        let events = engine.process(&gates, &[person(1, 100.0, 40.0)], &clock.ms(40));
        assert_eq!(events[0].kind, EventKind::Exit);

        let b_inward = set(1, vec![gate(1, InboundDirection::BToAInward, ActiveWindow::full_day())]);
        let mut engine = GateEngine::new(1, EngineConfig::default());
        engine.process(&b_inward, &[person(1, 100.0, 60.0)], &clock.ms(0));
        let events = engine.process(&b_inward, &[person(1, 100.0, 40.0)], &clock.ms(40));
        assert_eq!(events[0].kind, EventKind::Entry);
    }

    #[test]
    fn classification_can_be_disabled() {
        let config = EngineConfig {
            classify_direction: false,
            ..Default::default()
        };
        let mut engine = GateEngine::new(1, config);
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);
        let clock = Clock::at(12);
        engine.process(&gates, &[person(1, 100.0, 40.0)], &clock.ms(0));
        let events = engine.process(&gates, &[person(1, 100.0, 60.0)], &clock.ms(40));
        assert_eq!(events[0].kind, EventKind::GenericCross);
    }

    #[test]
    fn far_from_segment_updates_state_without_event() {
        let mut engine = GateEngine::new(1, EngineConfig::default());
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);
        let clock = Clock::at(12);

        // 穿过延长线, 距离线段远
        engine.process(&gates, &[person(1, 400.0, 40.0)], &clock.ms(0));
        assert!(engine.process(&gates, &[person(1, 400.0, 60.0)], &clock.ms(40)).is_empty());
        assert!(engine.has_state(1, 1));

        // 侧别已更新为 +1, 回到 -1 才构成越线
        assert!(engine.process(&gates, &[person(1, 100.0, 60.0)], &clock.ms(80)).is_empty());
        assert_eq!(engine.process(&gates, &[person(1, 100.0, 40.0)], &clock.ms(120)).len(), 1);
    }

    #[test]
    fn on_line_sample_keeps_previous_side() {
        let mut engine = GateEngine::new(1, EngineConfig::default());
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);
        let clock = Clock::at(12);

        engine.process(&gates, &[person(1, 100.0, 40.0)], &clock.ms(0));
        assert!(engine.process(&gates, &[person(1, 100.0, 50.0)], &clock.ms(40)).is_empty());
        assert_eq!(engine.process(&gates, &[person(1, 100.0, 60.0)], &clock.ms(80)).len(), 1);
    }

    #[test]
    fn tiny_normal_movement_is_treated_as_jitter() {
        let config = EngineConfig {
            min_normal_move_px: 5.0,
            ..Default::default()
        };
        let mut engine = GateEngine::new(1, config);
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);
        let clock = Clock::at(12);

        engine.process(&gates, &[person(1, 100.0, 49.0)], &clock.ms(0));
        assert!(engine.process(&gates, &[person(1, 100.0, 51.0)], &clock.ms(40)).is_empty());
        // 抑制不重置冷却, 随后的有效越线立即被接受
        assert_eq!(engine.process(&gates, &[person(1, 100.0, 40.0)], &clock.ms(80)).len(), 1);
    }

    #[test]
    fn gates_are_evaluated_independently() {
        let mut engine = GateEngine::new(1, EngineConfig::default());
        let gates = set(
            1,
            vec![
                gate(1, InboundDirection::AToBInward, ActiveWindow::full_day()),
                gate(2, InboundDirection::BToAInward, ActiveWindow::full_day()),
            ],
        );
        let clock = Clock::at(12);
        engine.process(&gates, &[person(1, 100.0, 40.0), person(2, 120.0, 40.0)], &clock.ms(0));
        let events = engine.process(
            &gates,
            &[person(1, 100.0, 60.0), person(2, 120.0, 60.0)],
            &clock.ms(40),
        );
        assert_eq!(events.len(), 4);
        assert_eq!(events.iter().filter(|e| e.kind == EventKind::Entry).count(), 2);
    }

    #[test]
    fn idle_pairs_are_evicted() {
        let config = EngineConfig {
            idle_evict_ms: 1000,
            ..Default::default()
        };
        let mut engine = GateEngine::new(1, config);
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);
        let clock = Clock::at(12);

        engine.process(&gates, &[person(1, 100.0, 40.0), person(2, 90.0, 40.0)], &clock.ms(0));
        assert_eq!(engine.tracked_pairs(), 2);
        engine.process(&gates, &[person(2, 90.0, 40.0)], &clock.ms(900));
        assert_eq!(engine.tracked_pairs(), 2);
        engine.process(&gates, &[person(2, 90.0, 40.0)], &clock.ms(1500));
        assert!(!engine.has_state(1, 1));
        assert!(engine.has_state(1, 2));
    }

    #[test]
    fn cooldown_survives_short_disappearance() {
        let config = EngineConfig {
            cooldown_ms: 500,
            idle_evict_ms: 100,
            ..Default::default()
        };
        let mut engine = GateEngine::new(1, config);
        let gates = set(1, vec![gate(1, InboundDirection::AToBInward, ActiveWindow::full_day())]);
        let clock = Clock::at(12);

        let mut accepted = Vec::new();
        engine.process(&gates, &[person(1, 100.0, 40.0)], &clock.ms(0));
        accepted.extend(engine.process(&gates, &[person(1, 100.0, 60.0)], &clock.ms(40)));
        assert_eq!(accepted.len(), 1);

        // 闲置超时但仍在冷却期内, 状态不回收
        engine.process(&gates, &[], &clock.ms(200));
        assert!(engine.has_state(1, 1));
        accepted.extend(engine.process(&gates, &[person(1, 100.0, 60.0)], &clock.ms(250)));
        accepted.extend(engine.process(&gates, &[person(1, 100.0, 40.0)], &clock.ms(300)));
        assert_eq!(accepted.len(), 1);

        // 冷却结束且闲置超时后才回收
        engine.process(&gates, &[], &clock.ms(900));
        assert!(!engine.has_state(1, 1));
    }

    #[test]
    fn reload_drops_state_of_changed_gates() {
        let mut engine = GateEngine::new(1, EngineConfig::default());
        let clock = Clock::at(12);
        let old = set(
            1,
            vec![
                gate(1, InboundDirection::AToBInward, ActiveWindow::full_day()),
                gate(2, InboundDirection::AToBInward, ActiveWindow::full_day()),
            ],
        );
        engine.process(&old, &[person(1, 100.0, 40.0)], &clock.ms(0));
        assert!(engine.has_state(1, 1) && engine.has_state(2, 1));

        // 门线 1 反转方向, 门线 2 不变
        let new = set(
            2,
            vec![
                gate(1, InboundDirection::BToAInward, ActiveWindow::full_day()),
                gate(2, InboundDirection::AToBInward, ActiveWindow::full_day()),
            ],
        );
        let events = engine.process(&new, &[person(1, 100.0, 60.0)], &clock.ms(40));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].gate_id, 2);

        // 门线被删除后只评估新快照
        let only_one = set(3, vec![gate(1, InboundDirection::BToAInward, ActiveWindow::full_day())]);
        engine.process(&only_one, &[person(1, 100.0, 60.0)], &clock.ms(80));
        assert!(!engine.has_state(2, 1));
        assert!(engine.has_state(1, 1));
    }
}
