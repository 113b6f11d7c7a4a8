//! Commit serialization and listener ordering under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chorus::test_harness::{Appends, ScriptedSync, Transcript, init_tracing};
use chorus::{Buffer, Document, EditResponse};

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 30s");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn listener_initial_fires_once_before_updates() {
    init_tracing();
    let buffer = Buffer::new(Transcript::default());
    for i in 0..5 {
        buffer.push_changes(Appends::one(format!("{i};")));
    }

    let initials = Arc::new(Mutex::new(Vec::<Transcript>::new()));
    let updates = Arc::new(Mutex::new(Vec::<Appends>::new()));
    let handle = buffer.listen(
        {
            let initials = initials.clone();
            move |content| initials.lock().expect("initials").push(content.clone())
        },
        {
            let updates = updates.clone();
            move |commands| updates.lock().expect("updates").push(commands.clone())
        },
    );

    {
        let initials = initials.lock().expect("initials");
        assert_eq!(initials.len(), 1);
        assert_eq!(initials[0], buffer.content_snapshot());
    }
    assert!(updates.lock().expect("updates").is_empty());

    buffer.push_changes(Appends::one("5;"));
    assert_eq!(
        updates.lock().expect("updates").clone(),
        vec![Appends::one("5;")]
    );

    // Initial snapshot plus observed batches reproduces the content.
    let mut replica = initials.lock().expect("initials")[0].clone();
    for batch in updates.lock().expect("updates").iter() {
        replica = replica.integrate(batch);
    }
    assert_eq!(replica, buffer.content_snapshot());

    drop(handle);
    buffer.push_changes(Appends::one("6;"));
    assert_eq!(updates.lock().expect("updates").len(), 1);
}

#[test]
fn concurrent_sync_writers_serialize() {
    init_tracing();
    const EACH: usize = 500;

    let mut buffer = Buffer::new(Transcript::default());

    let initial = Arc::new(Mutex::new(Transcript::default()));
    let observed = Arc::new(Mutex::new(Vec::<Appends>::new()));
    let _listener = buffer.listen(
        {
            let initial = initial.clone();
            move |content| *initial.lock().expect("initial") = content.clone()
        },
        {
            let observed = observed.clone();
            move |commands| observed.lock().expect("observed").push(commands.clone())
        },
    );

    let mut length_logs = Vec::new();
    for tag in ["a", "b"] {
        let lengths = Arc::new(Mutex::new(Vec::<usize>::new()));
        length_logs.push(lengths.clone());
        let emitted = Arc::new(AtomicUsize::new(0));
        let writer = ScriptedSync::new(format!("writer-{tag}"), move |notification| {
            lengths
                .lock()
                .expect("lengths")
                .push(notification.content.0.len());
            let i = emitted.fetch_add(1, Ordering::SeqCst);
            if i < EACH {
                Ok(EditResponse::updates(Appends::one(format!("{tag}{i};"))))
            } else {
                Ok(EditResponse::done())
            }
        });
        buffer.add_edit(writer);
    }

    buffer.push_changes(Appends::one("seed;"));
    wait_for(|| buffer.version() >= 1 + 2 * EACH as u64);
    buffer.close();

    // The listener's replica, integrated in observation order, matches the
    // final content exactly.
    let observed = observed.lock().expect("observed").clone();
    let mut replica = initial.lock().expect("initial").clone();
    for batch in &observed {
        replica = replica.integrate(batch);
    }
    assert_eq!(replica, buffer.content_snapshot());

    // Every emitted command is observed exactly once.
    let mut fragments: Vec<String> = observed.iter().flat_map(|batch| batch.0.clone()).collect();
    let mut expected: Vec<String> = vec!["seed;".to_string()];
    for tag in ["a", "b"] {
        for i in 0..EACH {
            expected.push(format!("{tag}{i};"));
        }
    }
    fragments.sort();
    expected.sort();
    assert_eq!(fragments, expected);

    // Each writer saw a non-reverting document.
    for lengths in &length_logs {
        let lengths = lengths.lock().expect("lengths");
        assert!(lengths.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}

#[test]
fn external_pushes_interleave_with_collaborator_edits() {
    init_tracing();
    let mut buffer = Buffer::new(Transcript::default());

    let observed = Arc::new(Mutex::new(Vec::<Appends>::new()));
    let _listener = buffer.listen(
        |_| {},
        {
            let observed = observed.clone();
            move |commands| observed.lock().expect("observed").push(commands.clone())
        },
    );

    let emitted = Arc::new(AtomicUsize::new(0));
    let echo = {
        let emitted = emitted.clone();
        ScriptedSync::new("echo", move |_| {
            let i = emitted.fetch_add(1, Ordering::SeqCst);
            if i < 20 {
                Ok(EditResponse::updates(Appends::one(format!("e{i};"))))
            } else {
                Ok(EditResponse::none())
            }
        })
    };
    buffer.add_edit(echo);

    for i in 0..20 {
        buffer.push_changes(Appends::one(format!("x{i};")));
    }
    wait_for(|| {
        observed
            .lock()
            .expect("observed")
            .iter()
            .flat_map(|batch| batch.0.iter())
            .count()
            >= 40
    });
    buffer.close();

    let observed = observed.lock().expect("observed").clone();
    let mut replica = Transcript::default();
    for batch in &observed {
        replica = replica.integrate(batch);
    }
    assert_eq!(replica, buffer.content_snapshot());
}
