//! Integration tests across the reading pipeline:
//! gesture → commands → chapter controller, and fetch + events → reconciler.

use chrono::DateTime;
use pw_core::{
    Achievement, ApplyOutcome, Change, ChapterController, Criteria, Exit, GestureInterpreter,
    GestureSample, GestureStep, NavigationCommand, RawChange, ReadingMode, Reconciler,
    StaticContent, SyncStatus, Transition, UserAchievement,
};
use uuid::Uuid;

const CATALOG: &str = r#"[
    {
        "id": "habits",
        "title": "Building Habits",
        "chapters": [
            {
                "id": 1,
                "title": "Cues",
                "pages": [
                    {"id": 1, "type": "content", "title": "What is a cue", "content": ["A trigger."],
                     "slowModeTitle": "Cues, slowly", "slowModeContent": ["A cue is a trigger.", "It starts the loop."]},
                    {"id": 2, "type": "content", "title": "Noticing", "content": ["Watch for them."]},
                    {"id": 3, "type": "content", "title": "Stacking", "content": ["Attach to a habit."],
                     "fastModeContent": ["Stack it."]},
                    {"id": 4, "type": "quiz", "title": "Check", "questions": [
                        {"question": "A cue is?", "answers": ["A trigger", "A reward"], "correctAnswerIndex": 0}
                    ]}
                ]
            },
            {
                "id": 2,
                "title": "Rewards",
                "pages": [
                    {"id": 1, "type": "content", "title": "Why rewards", "content": ["They close the loop."]}
                ]
            }
        ]
    }
]"#;

fn content() -> StaticContent {
    StaticContent::from_json(CATALOG).unwrap()
}

fn drag(interp: &mut GestureInterpreter, dx: f32, dy: f32) -> Vec<NavigationCommand> {
    interp.feed(GestureSample::started());
    interp.feed(GestureSample::updated(dx / 2.0, dy / 2.0));
    match interp.feed(GestureSample::ended(dx, dy)) {
        GestureStep::Finished(commands) => commands,
        other => panic!("expected finished gesture, got {other:?}"),
    }
}

fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn achievement(n: u128, title: &str, updated: i64) -> Achievement {
    Achievement {
        id: id(n),
        title: title.to_string(),
        description: String::new(),
        criteria: Criteria {
            kind: "lessons_completed".to_string(),
            required_value: 1,
        },
        badge_url: String::new(),
        points: 5,
        created_at: DateTime::from_timestamp(0, 0).unwrap(),
        updated_at: DateTime::from_timestamp(updated, 0).unwrap(),
        earned_at: None,
    }
}

fn titles(r: &Reconciler<Achievement>) -> Vec<String> {
    r.items().iter().map(|a| a.title.clone()).collect()
}

#[test]
fn next_walks_chapter_then_advances() {
    let content = content();
    let mut ctl = ChapterController::open(&content, "habits", 1).unwrap();
    let n = ctl.position().total_pages;

    for _ in 0..n - 1 {
        ctl.apply(&content, NavigationCommand::Next, 0).unwrap();
    }
    assert_eq!(ctl.position().page_index, n - 1);

    let t = ctl.apply(&content, NavigationCommand::Next, 0).unwrap();
    assert_eq!(t, Transition::ChapterChanged { chapter_id: 2 });
    assert_eq!(ctl.position().page_index, 0);

    // Last page of last chapter
    let t = ctl.apply(&content, NavigationCommand::Next, 0).unwrap();
    assert_eq!(
        t,
        Transition::Exited(Exit::LessonOverview {
            lesson_id: "habits".to_string()
        })
    );
}

#[test]
fn previous_from_first_page_exits() {
    let content = content();
    for chapter in [1, 2] {
        let mut ctl = ChapterController::open(&content, "habits", chapter).unwrap();
        let t = ctl.apply(&content, NavigationCommand::Previous, 0).unwrap();
        assert_eq!(t, Transition::Exited(Exit::Back));
        assert_eq!(ctl.position().page_index, 0);
    }
}

#[test]
fn gesture_classification_examples() {
    let mut interp = GestureInterpreter::default();
    assert_eq!(drag(&mut interp, -150.0, 0.0), [NavigationCommand::Next]);
    assert_eq!(
        drag(&mut interp, -150.0, 150.0),
        [NavigationCommand::Next, NavigationCommand::EnterFastMode]
    );
    assert_eq!(drag(&mut interp, -50.0, 0.0), [NavigationCommand::Cancel]);
}

#[test]
fn diagonal_swipe_drives_controller() {
    let content = content();
    let mut interp = GestureInterpreter::default();
    let mut ctl = ChapterController::open(&content, "habits", 1).unwrap();

    ctl.apply(&content, NavigationCommand::Next, 0).unwrap();
    let commands = drag(&mut interp, -150.0, 150.0);
    let transitions = ctl.apply_all(&content, &commands, 1_000).unwrap();

    // Next moves to page 2, then fast mode skips on to page 3 with the flag kept
    assert_eq!(transitions.len(), 2);
    assert_eq!(ctl.position().page_index, 3);
    assert_eq!(ctl.mode(), ReadingMode::Fast);
    assert_eq!(ctl.mode_deadline(), Some(1_300));
}

#[test]
fn slow_mode_resets_after_quiet_period() {
    let content = content();
    let mut ctl = ChapterController::open(&content, "habits", 1).unwrap();

    ctl.apply(&content, NavigationCommand::EnterSlowMode, 0).unwrap();
    assert_eq!(ctl.mode(), ReadingMode::Slow);
    assert_eq!(ctl.view().title, "Cues, slowly");

    assert!(!ctl.expire_mode(299));
    assert_eq!(ctl.mode(), ReadingMode::Slow);
    assert!(ctl.expire_mode(300));
    assert_eq!(ctl.mode(), ReadingMode::Normal);
}

#[test]
fn next_cancels_pending_mode_reset() {
    let content = content();
    let mut ctl = ChapterController::open(&content, "habits", 1).unwrap();

    ctl.apply(&content, NavigationCommand::EnterSlowMode, 0).unwrap();
    ctl.apply(&content, NavigationCommand::Next, 100).unwrap();
    assert_eq!(ctl.mode(), ReadingMode::Normal);
    assert_eq!(ctl.mode_deadline(), None);
    assert!(!ctl.expire_mode(10_000));
}

#[test]
fn reconciler_merges_in_place() {
    let mut r = Reconciler::new();
    r.initialize(vec![achievement(1, "A v1", 1), achievement(2, "B v1", 1)]);
    r.apply(Change::upsert(&achievement(1, "A v2", 2)).unwrap());
    assert_eq!(titles(&r), ["A v2", "B v1"]);
}

#[test]
fn reconciler_appends_unknown_at_tail() {
    let mut r = Reconciler::new();
    r.initialize(vec![achievement(1, "A", 1)]);
    r.apply(Change::upsert(&achievement(3, "C", 1)).unwrap());
    assert_eq!(titles(&r), ["A", "C"]);
}

#[test]
fn raw_feed_with_awards_before_fetch() {
    let mut r: Reconciler<Achievement> = Reconciler::new();

    let award = UserAchievement {
        user_id: id(9),
        achievement_id: id(2),
        earned_at: DateTime::from_timestamp(40, 0).unwrap(),
    };
    let raw = RawChange::update("achievements", award.earned_patch());
    assert_eq!(r.apply_raw(&raw), ApplyOutcome::Buffered);

    let stale = RawChange::update(
        "achievements",
        serde_json::to_value(achievement(1, "A old", 0)).unwrap(),
    );
    r.apply_raw(&stale);

    r.initialize(vec![achievement(1, "A", 5), achievement(2, "B", 5)]);
    assert_eq!(r.status(), &SyncStatus::Live);
    assert_eq!(titles(&r), ["A", "B"]);
    assert!(r.get(&id(2)).unwrap().is_earned());
    assert!(!r.get(&id(1)).unwrap().is_earned());
}
