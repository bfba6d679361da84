use blocktree_command::{Command, CommandError, CommandManager, Context, CtxKey, from_fn};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const A: CtxKey<u32> = CtxKey::new("a");
const B: CtxKey<u32> = CtxKey::new("b");
const C: CtxKey<u32> = CtxKey::new("c");
const INPUT: CtxKey<String> = CtxKey::new("input");
const SEEN: CtxKey<String> = CtxKey::new("seen");

/// Honors `RUST_LOG` when debugging a test run.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn set<T: Clone + Send + Sync + 'static>(key: CtxKey<T>, value: T) -> impl Command {
    from_fn("set", move |_, next| {
        next.with(Context::new().with(&key, value.clone()));
        Ok(())
    })
}

/// Never calls `next`.
fn stop() -> impl Command {
    from_fn("stop", |_, _next| Ok(()))
}

fn count(counter: &Arc<AtomicUsize>) -> impl Command + use<> {
    let counter = counter.clone();
    from_fn("count", move |_, next| {
        counter.fetch_add(1, Ordering::SeqCst);
        next.call();
        Ok(())
    })
}

fn collect_errors(manager: &CommandManager) -> Arc<Mutex<Vec<String>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    // Dropping the handle keeps the subscription alive.
    let _ = manager
        .errors()
        .subscribe(move |e: &Arc<CommandError>| sink.lock().push(e.to_string()));
    errors
}

// ── pipe ─────────────────────────────────────────────────────────

#[test]
fn a_full_chain_succeeds_with_every_output() {
    let manager = CommandManager::new();
    let (ok, ctx) = manager
        .chain()
        .pipe(set(A, 1))
        .pipe(set(B, 2))
        .pipe(set(C, 3))
        .run();

    assert!(ok);
    assert_eq!(
        (ctx.get(&A), ctx.get(&B), ctx.get(&C)),
        (Some(&1), Some(&2), Some(&3))
    );
}

#[test]
fn an_empty_chain_succeeds() {
    let manager = CommandManager::new();
    let (ok, ctx) = manager.chain().run();
    assert!(ok);
    assert!(ctx.is_empty());
}

#[test]
fn a_command_that_does_not_continue_stops_the_chain() {
    let manager = CommandManager::new();
    let after = Arc::new(AtomicUsize::new(0));

    let (ok, ctx) = manager
        .chain()
        .pipe(set(A, 1))
        .pipe(stop())
        .pipe(count(&after))
        .pipe(set(C, 3))
        .run();

    assert!(!ok);
    assert_eq!(ctx.get(&A), Some(&1));
    assert_eq!(ctx.get(&C), None);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn commands_run_in_pipe_order() {
    let manager = CommandManager::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let step = |name: &'static str| {
        let order = order.clone();
        from_fn(name, move |_, next| {
            order.lock().push(name);
            next.call();
            Ok(())
        })
    };

    let (ok, _) = manager
        .chain()
        .pipe(step("first"))
        .pipe(step("second"))
        .pipe(step("third"))
        .run();
    assert!(ok);
    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
}

#[test]
fn later_commands_see_earlier_output() {
    let manager = CommandManager::new();
    let (ok, ctx) = manager
        .chain()
        .pipe(set(A, 20))
        .pipe(from_fn("double", |ctx, next| {
            let a = *ctx.require(&A)?;
            next.with(Context::new().with(&B, a * 2));
            Ok(())
        }))
        .run();
    assert!(ok);
    assert_eq!(ctx.get(&B), Some(&40));
}

#[test]
fn pipe_input_is_visible_to_its_command_only() {
    let manager = CommandManager::new();
    let echo = from_fn("echo", |ctx, next| {
        let input = ctx.require(&INPUT)?.clone();
        next.with(Context::new().with(&SEEN, input));
        Ok(())
    });
    let (ok, ctx) = manager
        .chain()
        .pipe_with(echo, Context::new().with(&INPUT, "hello".to_owned()))
        .run();

    assert!(ok);
    assert_eq!(ctx.get(&SEEN).map(String::as_str), Some("hello"));
    assert_eq!(ctx.get(&INPUT), None);
}

#[test]
fn with_seeds_values() {
    let manager = CommandManager::new();
    let (ok, ctx) = manager
        .chain()
        .with(Context::new().with(&A, 1).with(&B, 1))
        .with(Context::new().with(&B, 2))
        .run();
    assert!(ok);
    assert_eq!((ctx.get(&A), ctx.get(&B)), (Some(&1), Some(&2)));
}

#[test]
fn exec_runs_one_command() {
    let manager = CommandManager::new();
    let double = || {
        from_fn("double", |ctx, next| {
            let a = ctx.get(&A).copied().unwrap_or(0);
            next.with(Context::new().with(&B, a * 2));
            Ok(())
        })
    };

    let (ok, ctx) = manager.exec(double(), Some(Context::new().with(&A, 4)));
    assert!(ok);
    assert_eq!(ctx.get(&B), Some(&8));

    let (ok, ctx) = manager.exec(double(), None);
    assert!(ok);
    assert_eq!(ctx.get(&B), Some(&0));

    assert!(!manager.exec(stop(), None).0);
}

// ── try_any / try_all ────────────────────────────────────────────

#[test]
fn try_any_takes_the_first_successful_branch() {
    let manager = CommandManager::new();
    let third = Arc::new(AtomicUsize::new(0));

    let (ok, ctx) = manager
        .chain()
        .pipe(set(A, 1))
        .try_any(|cmd| {
            vec![
                // Writes B, then fails: B must not leak.
                cmd.chain().pipe(set(B, 99)).pipe(stop()),
                cmd.chain().pipe(set(C, 3)),
                cmd.chain().pipe(count(&third)),
            ]
        })
        .pipe(from_fn("check", |ctx, next| {
            assert_eq!(ctx.get(&A), Some(&1));
            next.call();
            Ok(())
        }))
        .run();

    assert!(ok);
    assert_eq!(ctx.get(&C), Some(&3));
    assert_eq!(ctx.get(&B), None);
    assert_eq!(third.load(Ordering::SeqCst), 0);
}

#[test]
fn branches_start_from_the_context_before_the_step() {
    let manager = CommandManager::new();
    let (ok, ctx) = manager
        .chain()
        .pipe(set(A, 5))
        .try_any(|cmd| {
            vec![
                cmd.chain().pipe(set(A, 6)).pipe(stop()),
                cmd.chain().pipe(from_fn("read", |ctx, next| {
                    let a = *ctx.require(&A)?;
                    next.with(Context::new().with(&B, a));
                    Ok(())
                })),
            ]
        })
        .run();
    assert!(ok);
    assert_eq!(ctx.get(&B), Some(&5));
}

#[test]
fn try_any_fails_when_every_branch_fails() {
    let manager = CommandManager::new();
    let after = Arc::new(AtomicUsize::new(0));
    let (ok, ctx) = manager
        .chain()
        .pipe(set(A, 1))
        .try_any(|cmd| vec![cmd.chain().pipe(stop()), cmd.chain().pipe(set(B, 2)).pipe(stop())])
        .pipe(count(&after))
        .run();

    assert!(!ok);
    assert_eq!(ctx.get(&A), Some(&1));
    assert_eq!(ctx.get(&B), None);
    assert_eq!(after.load(Ordering::SeqCst), 0);

    let (ok, _) = manager.chain().try_any(|_| Vec::new()).run();
    assert!(!ok);
}

#[test]
fn try_all_merges_every_successful_branch() {
    let manager = CommandManager::new();
    let runs = Arc::new(AtomicUsize::new(0));

    let (ok, ctx) = manager
        .chain()
        .try_all(|cmd| {
            vec![
                cmd.chain().pipe(count(&runs)).pipe(set(A, 1)),
                cmd.chain().pipe(count(&runs)).pipe(set(B, 2)).pipe(stop()),
                cmd.chain().pipe(count(&runs)).pipe(set(C, 3)),
            ]
        })
        .run();

    assert!(ok);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(
        (ctx.get(&A), ctx.get(&B), ctx.get(&C)),
        (Some(&1), None, Some(&3))
    );
}

#[test]
fn try_all_branches_see_earlier_successes() {
    let manager = CommandManager::new();
    let (ok, ctx) = manager
        .chain()
        .try_all(|cmd| {
            vec![
                cmd.chain().pipe(set(A, 7)),
                cmd.chain().pipe(from_fn("copy", |ctx, next| {
                    let a = *ctx.require(&A)?;
                    next.with(Context::new().with(&B, a));
                    Ok(())
                })),
            ]
        })
        .run();
    assert!(ok);
    assert_eq!(ctx.get(&B), Some(&7));
}

#[test]
fn try_all_fails_when_every_branch_fails() {
    let manager = CommandManager::new();
    let (ok, _) = manager
        .chain()
        .try_all(|cmd| vec![cmd.chain().pipe(stop()), cmd.chain().pipe(stop())])
        .run();
    assert!(!ok);
}

// ── failures ─────────────────────────────────────────────────────

#[test]
fn errors_fail_the_run_and_are_reported() {
    init_tracing();
    let manager = CommandManager::new();
    let errors = collect_errors(&manager);
    let after = Arc::new(AtomicUsize::new(0));

    let (ok, ctx) = manager
        .chain()
        .pipe(set(A, 1))
        .pipe(from_fn("broken", |_, _next| anyhow::bail!("no luck")))
        .pipe(count(&after))
        .run();

    assert!(!ok);
    assert_eq!(ctx.get(&A), Some(&1));
    assert_eq!(after.load(Ordering::SeqCst), 0);
    assert_eq!(
        *errors.lock(),
        vec!["command 'broken' failed: no luck".to_owned()]
    );
}

#[test]
fn panics_are_caught() {
    init_tracing();
    let manager = CommandManager::new();
    let errors = collect_errors(&manager);

    let (ok, ctx) = manager
        .chain()
        .pipe(set(A, 1))
        .pipe(from_fn("explode", |_, _next| panic!("boom")))
        .run();

    assert!(!ok);
    assert_eq!(ctx.get(&A), Some(&1));
    assert_eq!(
        *errors.lock(),
        vec!["command 'explode' panicked: boom".to_owned()]
    );

    // The manager keeps working.
    assert!(manager.chain().pipe(set(B, 2)).run().0);
}

#[test]
fn an_error_after_continuing_still_fails_the_run() {
    let manager = CommandManager::new();
    let after = Arc::new(AtomicUsize::new(0));
    let (ok, _) = manager
        .chain()
        .pipe(from_fn("late", |_, next| {
            next.call();
            anyhow::bail!("too late")
        }))
        .pipe(count(&after))
        .run();

    assert!(!ok);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[test]
fn a_failing_branch_does_not_fail_the_outer_chain() {
    let manager = CommandManager::new();
    let errors = collect_errors(&manager);

    let (ok, ctx) = manager
        .chain()
        .try_any(|cmd| {
            vec![
                cmd.chain()
                    .pipe(from_fn("flaky", |_, _next| anyhow::bail!("offline"))),
                cmd.chain().pipe(set(A, 1)),
            ]
        })
        .run();

    assert!(ok);
    assert_eq!(ctx.get(&A), Some(&1));
    assert_eq!(errors.lock().len(), 1);
}

#[test]
fn a_manager_without_scope_has_no_std() {
    let manager = CommandManager::new();
    let errors = collect_errors(&manager);
    let (ok, _) = manager.exec(
        from_fn("needs_std", |ctx, next| {
            ctx.std()?;
            next.call();
            Ok(())
        }),
        None,
    );
    assert!(!ok);
    assert_eq!(errors.lock().len(), 1);
}

// ── properties ───────────────────────────────────────────────────

const KEYS: [CtxKey<usize>; 8] = [
    CtxKey::new("k0"),
    CtxKey::new("k1"),
    CtxKey::new("k2"),
    CtxKey::new("k3"),
    CtxKey::new("k4"),
    CtxKey::new("k5"),
    CtxKey::new("k6"),
    CtxKey::new("k7"),
];

proptest! {
    /// A chain succeeds iff every step continues, and its context holds
    /// exactly the output of the steps before the first stop.
    #[test]
    fn context_holds_the_prefix_before_the_first_stop(
        steps in prop::collection::vec(any::<bool>(), 0..8)
    ) {
        let manager = CommandManager::new();
        let mut chain = manager.chain();
        for (i, continues) in steps.iter().enumerate() {
            chain = if *continues {
                chain.pipe(set(KEYS[i], i))
            } else {
                chain.pipe(stop())
            };
        }
        let (ok, ctx) = chain.run();

        let prefix = steps.iter().take_while(|c| **c).count();
        prop_assert_eq!(ok, prefix == steps.len());
        prop_assert_eq!(ctx.len(), prefix);
        for (i, key) in KEYS.iter().enumerate().take(steps.len()) {
            prop_assert_eq!(ctx.get(key).is_some(), i < prefix);
        }
    }
}
