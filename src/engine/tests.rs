use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::*;
use crate::error::{AppError, ListenerError, PlanError};
use crate::plan::{Node, NodeKind, OnSampleError, ThreadGroupSpec, ThroughputMode};

/// Records samples in arrival order.
#[derive(Default)]
struct Recorder {
    samples: Mutex<Vec<SampleResult>>,
}

impl Recorder {
    fn labels(&self) -> Vec<String> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|sample| sample.label.clone())
            .collect()
    }

    fn payloads(&self) -> Vec<String> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|sample| sample.payload.clone())
            .collect()
    }
}

impl Listener for Recorder {
    fn sample_occurred(
        &self,
        _component: ComponentRef<'_>,
        record: &SampleRecord,
    ) -> Result<(), ListenerError> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.result.clone());
        Ok(())
    }
}

struct FailingListener {
    recoverable: bool,
}

impl Listener for FailingListener {
    fn sample_occurred(
        &self,
        component: ComponentRef<'_>,
        _record: &SampleRecord,
    ) -> Result<(), ListenerError> {
        if self.recoverable {
            Err(ListenerError::recoverable(component.name, "flaky"))
        } else {
            Err(ListenerError::unrecoverable(component.name, "broken"))
        }
    }
}

/// Sampler that counts how many callers are inside it at once.
#[derive(Default)]
struct OverlapProbe {
    inside: AtomicU32,
    overlaps: AtomicU32,
}

#[async_trait]
impl Sampler for OverlapProbe {
    async fn sample(&self, component: ComponentRef<'_>, _ctx: &SampleContext<'_>) -> SampleResult {
        if self.inside.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.inside.fetch_sub(1, Ordering::SeqCst);
        SampleResult::success(component.name, Duration::from_millis(2))
    }
}

#[async_trait]
impl Sampler for Arc<OverlapProbe> {
    async fn sample(&self, component: ComponentRef<'_>, ctx: &SampleContext<'_>) -> SampleResult {
        <OverlapProbe as Sampler>::sample(self, component, ctx).await
    }
}

fn debug_sampler(name: &str) -> Node {
    Node::sampler(name, "debug")
}

fn listener(name: &str, kind: &str) -> Node {
    Node::new(
        name,
        NodeKind::Listener {
            kind: kind.to_owned(),
            properties: Default::default(),
        },
    )
}

fn plan_of(groups: Vec<ThreadGroupSpec>) -> TestPlan {
    TestPlan {
        name: "engine-test".to_owned(),
        groups,
    }
}

fn caps_with_recorder() -> AppResult<(Arc<Capabilities>, Arc<Recorder>)> {
    let mut caps = Capabilities::with_builtins()?;
    let recorder = Arc::new(Recorder::default());
    caps.register_shared_listener("recorder", recorder.clone());
    Ok((Arc::new(caps), recorder))
}

async fn run_plan(plan: TestPlan, caps: Arc<Capabilities>) -> AppResult<(RunSummary, Arc<RunContext>)> {
    let engine = Engine::new(plan, caps, EngineOptions::default())?;
    let summary = engine.run().await?;
    Ok((summary, engine.context()))
}

#[tokio::test]
async fn counts_samples_and_returns_active_to_zero() -> AppResult<()> {
    let mut group = ThreadGroupSpec::new("users", 3, vec![debug_sampler("a"), debug_sampler("b")]);
    group.loops = Some(2);
    let (summary, context) = run_plan(plan_of(vec![group]), Arc::new(Capabilities::with_builtins()?)).await?;
    assert_eq!(summary.samples, 12);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.threads_started, 3);
    assert_eq!(summary.exits_with(ExitReason::IterationsDone), 3);
    assert_eq!(context.counters().active(), 0);
    Ok(())
}

#[tokio::test]
async fn unrecoverable_listener_stops_user_and_releases_lock() -> AppResult<()> {
    let mut caps = Capabilities::with_builtins()?;
    caps.register_listener("broken", FailingListener { recoverable: false });
    let section = Node::new(
        "cart",
        NodeKind::CriticalSection {
            lock: "cart".to_owned(),
        },
    )
    .with_children(vec![debug_sampler("checkout").with_children(vec![listener("explode", "broken")])]);
    let mut group = ThreadGroupSpec::new("users", 4, vec![section]);
    group.loops = None;

    let engine = Engine::new(plan_of(vec![group]), Arc::new(caps), EngineOptions::default())?;
    let summary = tokio::time::timeout(Duration::from_secs(10), engine.run())
        .await
        .map_err(|_elapsed| AppError::from("run deadlocked on the critical section"))??;
    assert_eq!(summary.exits_with(ExitReason::ListenerFailed), 4);
    assert_eq!(summary.samples, 4);
    assert_eq!(engine.context().counters().active(), 0);
    Ok(())
}

#[tokio::test]
async fn recoverable_listener_failure_is_swallowed() -> AppResult<()> {
    let mut caps = Capabilities::with_builtins()?;
    caps.register_listener("flaky", FailingListener { recoverable: true });
    let mut group = ThreadGroupSpec::new(
        "users",
        1,
        vec![debug_sampler("a").with_children(vec![listener("flaky", "flaky")])],
    );
    group.loops = Some(3);
    let (summary, _) = run_plan(plan_of(vec![group]), Arc::new(caps)).await?;
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.exits_with(ExitReason::IterationsDone), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn critical_section_never_overlaps() -> AppResult<()> {
    let probe = Arc::new(OverlapProbe::default());
    let mut caps = Capabilities::with_builtins()?;
    caps.register_sampler("probe", Arc::clone(&probe));
    let section = Node::new(
        "guarded",
        NodeKind::CriticalSection {
            lock: "shared".to_owned(),
        },
    )
    .with_children(vec![Node::sampler("touch", "probe")]);
    let mut group = ThreadGroupSpec::new("users", 6, vec![section]);
    group.loops = Some(5);
    let (summary, _) = run_plan(plan_of(vec![group]), Arc::new(caps)).await?;
    assert_eq!(summary.samples, 30);
    assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn controllers_follow_their_rules() -> AppResult<()> {
    let (caps, recorder) = caps_with_recorder()?;
    let once = Node::new("setup", NodeKind::OnceOnlyController)
        .with_children(vec![debug_sampler("login")]);
    let interleave = Node::new("alternate", NodeKind::InterleaveController)
        .with_children(vec![debug_sampler("left"), debug_sampler("right")]);
    let inner_loop = Node::new("twice", NodeKind::LoopController { count: 2 })
        .with_children(vec![debug_sampler("poll")]);
    let tree = vec![
        listener("record", "recorder"),
        once,
        interleave,
        inner_loop,
        debug_sampler("skipped").disabled(),
    ];
    let mut group = ThreadGroupSpec::new("users", 1, tree);
    group.loops = Some(3);
    let (summary, _) = run_plan(plan_of(vec![group]), caps).await?;
    assert_eq!(summary.samples, 10);
    assert_eq!(
        recorder.labels(),
        vec![
            "login", "left", "poll", "poll", "right", "poll", "poll", "left", "poll", "poll"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn transaction_emits_parent_sample() -> AppResult<()> {
    let (caps, recorder) = caps_with_recorder()?;
    let transaction = Node::new("checkout", NodeKind::TransactionController).with_children(vec![
        debug_sampler("cart").with_property("latency_ms", "5"),
        debug_sampler("pay")
            .with_property("latency_ms", "5")
            .with_property("success", "false"),
    ]);
    let group = ThreadGroupSpec::new("users", 1, vec![listener("record", "recorder"), transaction]);
    let (summary, _) = run_plan(plan_of(vec![group]), caps).await?;
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.errors, 2);
    assert_eq!(recorder.labels(), vec!["cart", "pay", "checkout"]);
    Ok(())
}

#[tokio::test]
async fn processors_share_variables_with_samplers() -> AppResult<()> {
    let (caps, recorder) = caps_with_recorder()?;
    let set = Node::new(
        "seed",
        NodeKind::PreProcessor {
            kind: "set_variable".to_owned(),
            properties: Default::default(),
        },
    )
    .with_property("name", "token")
    .with_property("value", "abc");
    let capture = Node::new(
        "grab",
        NodeKind::PostProcessor {
            kind: "capture".to_owned(),
            properties: Default::default(),
        },
    )
    .with_property("variable", "echoed");
    let echo = debug_sampler("echo")
        .with_property("echo", "token")
        .with_children(vec![set, capture]);
    let check = debug_sampler("check").with_property("echo", "echoed");
    let group = ThreadGroupSpec::new("users", 1, vec![listener("record", "recorder"), echo, check]);
    let (summary, _) = run_plan(plan_of(vec![group]), caps).await?;
    assert_eq!(summary.samples, 2);
    assert_eq!(recorder.labels(), vec!["echo", "check"]);
    assert_eq!(recorder.payloads(), vec!["abc", "abc"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scheduled_end_stops_users_without_oversleeping() -> AppResult<()> {
    let timer = Node::new("think", NodeKind::ConstantTimer { delay_ms: 300 });
    let mut group = ThreadGroupSpec::new("users", 2, vec![timer, debug_sampler("a")]);
    group.loops = None;
    group.scheduler = Some(crate::plan::SchedulerSpec {
        duration_ms: Some(1_000),
        ..Default::default()
    });
    let started = Instant::now();
    let (summary, _) = run_plan(plan_of(vec![group]), Arc::new(Capabilities::with_builtins()?)).await?;
    assert_eq!(summary.exits_with(ExitReason::ScheduledEnd), 2);
    // 300, 600 and 900ms fit; the fourth delay would pass the end.
    assert_eq!(summary.samples, 6);
    assert!(started.elapsed() < Duration::from_millis(1_000));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_wakes_sleeping_users() -> AppResult<()> {
    let timer = Node::new("think", NodeKind::ConstantTimer { delay_ms: 60_000 });
    let mut group = ThreadGroupSpec::new("users", 3, vec![timer, debug_sampler("a")]);
    group.loops = None;
    let engine = Engine::new(
        plan_of(vec![group]),
        Arc::new(Capabilities::with_builtins()?),
        EngineOptions::default(),
    )?;
    let handle = engine.stop_handle();
    let started = Instant::now();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop(StopMode::Graceful);
    });
    let summary = engine.run().await?;
    stopper.await?;
    assert_eq!(summary.exits_with(ExitReason::Stopped), 3);
    assert_eq!(summary.samples, 0);
    assert!(started.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[tokio::test]
async fn stop_test_policy_ends_every_group() -> AppResult<()> {
    let failing = ThreadGroupSpec {
        loops: None,
        on_sample_error: OnSampleError::StopTest,
        ..ThreadGroupSpec::new(
            "failing",
            1,
            vec![debug_sampler("bad").with_property("success", "false")],
        )
    };
    let steady = ThreadGroupSpec {
        loops: None,
        ..ThreadGroupSpec::new(
            "steady",
            2,
            vec![
                Node::new("think", NodeKind::ConstantTimer { delay_ms: 5 }),
                debug_sampler("ok"),
            ],
        )
    };
    let engine = Engine::new(
        plan_of(vec![failing, steady]),
        Arc::new(Capabilities::with_builtins()?),
        EngineOptions::default(),
    )?;
    let summary = tokio::time::timeout(Duration::from_secs(10), engine.run())
        .await
        .map_err(|_elapsed| AppError::from("stop test policy did not end the run"))??;
    assert_eq!(summary.exits_with(ExitReason::SampleErrorPolicy), 1);
    assert_eq!(summary.exits_with(ExitReason::Stopped), 2);
    assert_eq!(engine.stop_handle().mode(), StopMode::Graceful);
    Ok(())
}

#[tokio::test]
async fn start_next_loop_skips_rest_of_iteration() -> AppResult<()> {
    let (caps, recorder) = caps_with_recorder()?;
    let group = ThreadGroupSpec {
        loops: Some(2),
        on_sample_error: OnSampleError::StartNextLoop,
        ..ThreadGroupSpec::new(
            "users",
            1,
            vec![
                listener("record", "recorder"),
                debug_sampler("bad").with_property("success", "false"),
                debug_sampler("never"),
            ],
        )
    };
    let (summary, _) = run_plan(plan_of(vec![group]), caps).await?;
    assert_eq!(recorder.labels(), vec!["bad", "bad"]);
    assert_eq!(summary.exits_with(ExitReason::IterationsDone), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sync_timer_releases_full_group() -> AppResult<()> {
    let sync = Node::new(
        "rendezvous",
        NodeKind::SyncTimer {
            group_size: 4,
            timeout_ms: Some(5_000),
        },
    );
    let mut group = ThreadGroupSpec::new("users", 4, vec![debug_sampler("go").with_children(vec![sync])]);
    group.ramp_up_ms = 400;
    let started = Instant::now();
    let (summary, context) = run_plan(plan_of(vec![group]), Arc::new(Capabilities::with_builtins()?)).await?;
    assert_eq!(summary.samples, 4);
    // Released when the last user arrives at the end of the ramp-up.
    assert!(started.elapsed() < Duration::from_millis(1_000));
    // Test end resets the registries.
    assert!(context.barriers().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn per_thread_throughput_paces_samples() -> AppResult<()> {
    let pace = Node::new(
        "pace",
        NodeKind::ConstantThroughputTimer {
            throughput: 600.0,
            mode: ThroughputMode::ThisThreadOnly,
        },
    );
    let mut group = ThreadGroupSpec::new("users", 1, vec![pace, debug_sampler("a")]);
    group.loops = Some(5);
    let started = Instant::now();
    let (summary, _) = run_plan(plan_of(vec![group]), Arc::new(Capabilities::with_builtins()?)).await?;
    assert_eq!(summary.samples, 5);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_millis(500));
    Ok(())
}

fn paced_group(
    name: &str,
    threads: u32,
    loops: u64,
    throughput: f64,
    mode: ThroughputMode,
) -> ThreadGroupSpec {
    let pace = Node::new("pace", NodeKind::ConstantThroughputTimer { throughput, mode });
    let mut group = ThreadGroupSpec::new(name, threads, vec![pace, debug_sampler("hit")]);
    group.loops = Some(loops);
    group
}

fn sync_timer(name: &str, group_size: u32, timeout_ms: Option<i64>) -> Node {
    Node::new(
        name,
        NodeKind::SyncTimer {
            group_size,
            timeout_ms,
        },
    )
}

/// Polls until every user of `group` has started and exited, returning the
/// time since `started`.
async fn group_finished_after(
    context: Arc<RunContext>,
    group: &'static str,
    started: Instant,
) -> Duration {
    loop {
        let counters = context.group_counters(group);
        if counters.started() > 0 && counters.active() == 0 {
            return started.elapsed();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn shared_throughput_schedule_spans_every_group() -> AppResult<()> {
    // Similar names must not split the run-wide schedule.
    let first = paced_group("a", 1, 4, 60.0, ThroughputMode::AllActiveThreadsShared);
    let second = paced_group("a/1", 1, 4, 60.0, ThroughputMode::AllActiveThreadsShared);
    let started = Instant::now();
    let (summary, _) = run_plan(
        plan_of(vec![first, second]),
        Arc::new(Capabilities::with_builtins()?),
    )
    .await?;
    assert_eq!(summary.samples, 8);
    // Eight samples one second apart on a single schedule.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7));
    assert!(elapsed < Duration::from_secs(8));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn group_shared_throughput_keeps_one_schedule_per_group() -> AppResult<()> {
    let first = paced_group("a", 2, 2, 60.0, ThroughputMode::AllActiveThreadsInGroupShared);
    let second = paced_group("b", 2, 2, 60.0, ThroughputMode::AllActiveThreadsInGroupShared);
    let started = Instant::now();
    let (summary, _) = run_plan(
        plan_of(vec![first, second]),
        Arc::new(Capabilities::with_builtins()?),
    )
    .await?;
    assert_eq!(summary.samples, 8);
    // Four samples per group schedule, run side by side.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(4));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn in_group_throughput_counts_only_its_own_group() -> AppResult<()> {
    let mut busy = ThreadGroupSpec::new(
        "busy",
        3,
        vec![debug_sampler("slow").with_property("latency_ms", "10000")],
    );
    busy.loops = Some(1);
    let paced = paced_group("paced", 1, 3, 60.0, ThroughputMode::AllActiveThreadsInGroup);
    let engine = Engine::new(
        plan_of(vec![busy, paced]),
        Arc::new(Capabilities::with_builtins()?),
        EngineOptions::default(),
    )?;
    let started = Instant::now();
    let watcher = tokio::spawn(group_finished_after(engine.context(), "paced", started));
    let summary = engine.run().await?;
    let paced_done = watcher.await?;
    assert_eq!(summary.samples, 6);
    // One running user in the group: one second apart, not four.
    assert!(paced_done >= Duration::from_secs(2));
    assert!(paced_done < Duration::from_millis(2_100));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scheduled_end_releases_user_left_at_barrier() -> AppResult<()> {
    let think = Node::new("think", NodeKind::ConstantTimer { delay_ms: 100 });
    let mut group = ThreadGroupSpec::new(
        "users",
        3,
        vec![think, debug_sampler("go").with_children(vec![sync_timer("pair", 2, None)])],
    );
    group.loops = None;
    group.scheduler = Some(crate::plan::SchedulerSpec {
        duration_ms: Some(1_000),
        ..Default::default()
    });
    let engine = Engine::new(
        plan_of(vec![group]),
        Arc::new(Capabilities::with_builtins()?),
        EngineOptions::default(),
    )?;
    let started = Instant::now();
    let summary = tokio::time::timeout(Duration::from_secs(3_600), engine.run())
        .await
        .map_err(|_elapsed| AppError::from("user stayed parked at the barrier"))??;
    assert_eq!(summary.exits_with(ExitReason::ScheduledEnd), 3);
    assert_eq!(engine.context().counters().active(), 0);
    assert!(started.elapsed() <= Duration::from_millis(1_000));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scheduled_end_abandons_critical_section_wait() -> AppResult<()> {
    let section = |sampler: Node| {
        Node::new(
            "cart",
            NodeKind::CriticalSection {
                lock: "cart".to_owned(),
            },
        )
        .with_children(vec![sampler])
    };
    let holder = ThreadGroupSpec::new(
        "holder",
        1,
        vec![section(debug_sampler("slow").with_property("latency_ms", "5000"))],
    );
    let mut waiter = ThreadGroupSpec::new("waiter", 1, vec![section(debug_sampler("quick"))]);
    waiter.scheduler = Some(crate::plan::SchedulerSpec {
        start_delay_ms: Some(10),
        duration_ms: Some(1_000),
        ..Default::default()
    });
    let engine = Engine::new(
        plan_of(vec![holder, waiter]),
        Arc::new(Capabilities::with_builtins()?),
        EngineOptions::default(),
    )?;
    let started = Instant::now();
    let watcher = tokio::spawn(group_finished_after(engine.context(), "waiter", started));
    let summary = engine.run().await?;
    let waiter_done = watcher.await?;
    assert_eq!(summary.samples, 1);
    assert_eq!(summary.exits_with(ExitReason::IterationsDone), 1);
    assert_eq!(summary.exits_with(ExitReason::ScheduledEnd), 1);
    assert!(waiter_done >= Duration::from_millis(1_010));
    assert!(waiter_done < Duration::from_millis(1_100));
    Ok(())
}

#[test]
fn barrier_settings_must_agree_across_groups() -> Result<(), String> {
    let first = ThreadGroupSpec::new(
        "a",
        1,
        vec![debug_sampler("x").with_children(vec![sync_timer("rv", 1, None)])],
    );
    let second = ThreadGroupSpec::new(
        "b",
        1,
        vec![debug_sampler("y").with_children(vec![sync_timer("rv", 2, None)])],
    );
    let caps = Capabilities::with_builtins().map_err(|err| err.to_string())?;
    match Engine::new(plan_of(vec![first, second]), Arc::new(caps), EngineOptions::default()) {
        Err(AppError::Plan(PlanError::BarrierMismatch { barrier })) => {
            assert_eq!(barrier, "rv");
            Ok(())
        }
        Err(err) => Err(format!("unexpected error: {}", err)),
        Ok(_) => Err("conflicting sync timers were accepted".to_owned()),
    }
}

#[test]
fn unknown_sampler_kind_is_rejected_up_front() -> Result<(), String> {
    let group = ThreadGroupSpec::new("users", 1, vec![Node::sampler("jdbc", "jdbc")]);
    let caps = Capabilities::with_builtins().map_err(|err| err.to_string())?;
    match Engine::new(plan_of(vec![group]), Arc::new(caps), EngineOptions::default()) {
        Err(AppError::Plan(PlanError::UnknownSampler { kind, path, .. })) => {
            assert_eq!(kind, "jdbc");
            assert_eq!(path, "/0");
            Ok(())
        }
        Err(err) => Err(format!("unexpected error: {}", err)),
        Ok(_) => Err("plan with an unknown sampler was accepted".to_owned()),
    }
}

#[test]
fn negative_timer_factor_is_rejected() -> Result<(), String> {
    let group = ThreadGroupSpec::new("users", 1, vec![debug_sampler("a")]);
    let caps = Capabilities::with_builtins().map_err(|err| err.to_string())?;
    let options = EngineOptions {
        timer_factor: -1.0,
        ..EngineOptions::default()
    };
    match Engine::new(plan_of(vec![group]), Arc::new(caps), options) {
        Err(AppError::Validation(_)) => Ok(()),
        Err(err) => Err(format!("unexpected error: {}", err)),
        Ok(_) => Err("negative timer factor was accepted".to_owned()),
    }
}

#[test]
fn window_resolves_relative_and_absolute_times() {
    let now = Instant::now();
    let wall_now = chrono::Utc::now();
    let relative = crate::plan::SchedulerSpec {
        start_delay_ms: Some(500),
        duration_ms: Some(1_000),
        ..Default::default()
    };
    let window = resolve_window(Some(&relative), now, wall_now);
    assert_eq!(Some(window.start), now.checked_add(Duration::from_millis(500)));
    assert_eq!(window.end, now.checked_add(Duration::from_millis(1_500)));

    let absolute = crate::plan::SchedulerSpec {
        start_at: wall_now.checked_sub_signed(chrono::Duration::seconds(5)),
        end_at: wall_now.checked_add_signed(chrono::Duration::seconds(2)),
        ..Default::default()
    };
    let window = resolve_window(Some(&absolute), now, wall_now);
    assert_eq!(window.start, now);
    assert_eq!(window.end, now.checked_add(Duration::from_secs(2)));

    assert_eq!(resolve_window(None, now, wall_now).end, None);
}

#[test]
fn ramp_offsets_spread_threads() {
    assert_eq!(ramp_offset(1_000, 0, 4), Duration::ZERO);
    assert_eq!(ramp_offset(1_000, 2, 4), Duration::from_millis(500));
    assert_eq!(ramp_offset(0, 3, 4), Duration::ZERO);
}
