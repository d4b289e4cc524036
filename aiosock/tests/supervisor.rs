use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aiosock::diag::NullRecorder;
use aiosock::supervisor::BoxError;
use aiosock::{supervise, SupervisorConfig, Task, TaskFailure, TaskGroup};
use pretty_assertions::assert_eq;

fn quiet() -> SupervisorConfig {
    SupervisorConfig::default().with_recorder(Arc::new(NullRecorder))
}

#[tokio::test]
async fn test_explicit_set_isolates_failure() {
    let tasks = vec![
        Task::spawn("first", async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, BoxError>(1)
        }),
        Task::spawn("second", async { Err::<i32, BoxError>("second failed".into()) }),
        Task::spawn("third", async { Ok::<_, BoxError>(3) }),
    ];
    let ids: Vec<_> = tasks.iter().map(Task::id).collect();

    let report = supervise(tasks, &quiet()).await;

    assert_eq!(report.len(), 3);
    assert_eq!(*report.get(ids[0]).unwrap().outcome.as_ref().unwrap(), 1);
    assert_eq!(*report.get(ids[2]).unwrap().outcome.as_ref().unwrap(), 3);
    match &report.get(ids[1]).unwrap().outcome {
        Err(TaskFailure::Error(err)) => assert_eq!(err.to_string(), "second failed"),
        other => panic!("unexpected {other:?}"),
    }
    let names: Vec<_> = report.failures().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["second"]);
}

#[tokio::test]
async fn test_group_waits_for_children() {
    let group: TaskGroup<&'static str> = TaskGroup::new();
    let finished = Arc::new(AtomicUsize::new(0));

    let spawner = group.clone();
    let counter = finished.clone();
    group.spawn("parent", async move {
        for name in ["child-a", "child-b"] {
            let counter = counter.clone();
            spawner.spawn(name, async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(name)
            });
        }
        Ok::<_, BoxError>("parent")
    });

    let report = group.wait_all(&quiet()).await;

    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert_eq!(report.len(), 3);
    let mut names: Vec<_> = report.successes().map(|entry| entry.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["child-a", "child-b", "parent"]);
    assert_eq!(group.pending(), 0);
}

#[tokio::test]
async fn test_group_follows_grandchildren() {
    let group: TaskGroup<u32> = TaskGroup::new();
    let outer = group.clone();
    group.spawn("root", async move {
        let inner = outer.clone();
        outer.spawn("child", async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inner.spawn("grandchild", async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, BoxError>(3)
            });
            Ok::<_, BoxError>(2)
        });
        Ok::<_, BoxError>(1)
    });

    let report = group.wait_all(&quiet()).await;
    let mut values: Vec<u32> = report
        .into_iter()
        .map(|entry| entry.outcome.unwrap())
        .collect();
    values.sort();
    assert_eq!(values, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_group_reports_each_unit_once() {
    let group: TaskGroup<()> = TaskGroup::new();
    group.spawn("only", async { Ok::<_, BoxError>(()) });

    let first = group.wait_all(&quiet()).await;
    let second = group.wait_all(&quiet()).await;
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_group_adopts_external_task() {
    let group: TaskGroup<usize> = TaskGroup::new();
    group.adopt(Task::spawn("external", async { Ok::<_, BoxError>(42) }));
    group.spawn("failing", async { Err::<usize, _>(std::io::Error::other("disk gone")) });

    let report = group.wait_all(&quiet().with_idle_rounds(0)).await;
    assert_eq!(report.successes().count(), 1);
    assert_eq!(report.failures().count(), 1);
}
