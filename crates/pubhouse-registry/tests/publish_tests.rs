mod common;

use bytes::Bytes;
use common::*;
use pubhouse_registry::*;
use pubhouse_worker::JobEvent;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_first_publish_creates_package() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    let archive = package_archive("widgets", "1.0.0");

    let receipt = t
        .registry
        .publish(archive.clone(), &alice, &client())
        .await
        .unwrap();

    assert!(receipt.is_new_package);
    assert_eq!(receipt.message(), "Successfully uploaded package widgets version 1.0.0.");
    assert_eq!(receipt.package.name, "widgets");
    assert_eq!(receipt.package.description.as_deref(), Some("The widgets package"));
    assert!(receipt.package.is_private);

    let version = t.registry.get_version("widgets", "1.0.0").await.unwrap();
    assert_eq!(version.archive_sha256, ContentAddress::sha256_hex(&archive));
    assert_eq!(
        version.archive_url,
        "https://pub.example.com/packages/widgets/versions/1.0.0.tar.gz"
    );
    assert_eq!(version.readme.as_deref(), Some("# widgets"));
    assert!(version.manifest.starts_with("name: widgets\n"));

    assert_eq!(
        t.blobs.get("packages/widgets/1.0.0.tar.gz").await.unwrap(),
        archive
    );
    assert!(
        t.registry
            .uploaders()
            .can_publish(&receipt.package.id, &alice.user_id)
            .await
            .unwrap()
    );

    let audit = wait_for_audit(&t.registry, 1).await;
    let entry = &audit.entries[0];
    assert_eq!(entry.action, "package.publish");
    assert_eq!(entry.resource_type, "package");
    assert_eq!(entry.resource_id, receipt.package.id.to_string());
    assert_eq!(entry.user_id.as_ref(), Some(&alice.user_id));
    assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.7"));
    assert_eq!(entry.user_agent.as_deref(), Some("dart pub 3.4.0"));
}

#[tokio::test]
async fn test_publish_generates_documentation() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    let mut events = t.registry.jobs().subscribe();

    let receipt = t
        .registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();

    let job = receipt.docs_job.expect("docs job enqueued");
    let event = wait_for_job(&mut events, job).await;
    assert_eq!(event, JobEvent::Completed { id: job, kind: DOCS_JOB_KIND });

    let docs = t.registry.fetch_docs("widgets", "1.0.0").await.unwrap();
    assert_eq!(docs.package, "widgets");
    assert_eq!(docs.version, "1.0.0");
    assert_eq!(docs.libraries, vec!["lib/widgets.dart"]);
    assert_eq!(docs.file_count, 4);
}

#[tokio::test]
async fn test_docs_not_found_before_generation() {
    let t = memory_registry();

    let result = t.registry.fetch_docs("widgets", "1.0.0").await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_republishing_a_version_is_rejected() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    let first = package_archive_with_readme("widgets", "1.0.0", "first");

    t.registry.publish(first.clone(), &alice, &client()).await.unwrap();
    let original = t.registry.get_version("widgets", "1.0.0").await.unwrap();

    let second = package_archive_with_readme("widgets", "1.0.0", "second");
    let err = t
        .registry
        .publish(second, &alice, &client())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, RegistryError::VersionExists { .. }));
    assert_eq!(t.blobs.get("packages/widgets/1.0.0.tar.gz").await.unwrap(), first);
    assert_eq!(t.registry.get_version("widgets", "1.0.0").await.unwrap(), original);
}

#[tokio::test]
async fn test_bad_archives_leave_no_trace() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;

    let cases = [
        build_archive(&[("README.md", "no manifest here")]),
        build_archive(&[("pubspec.yaml", "name: widgets\nversion: 1.0\n")]),
        build_archive(&[("pubspec.yaml", "name: Widgets\nversion: 1.0.0\n")]),
        build_archive(&[("pubspec.yaml", "- just\n- a list\n")]),
        Bytes::from_static(b"definitely not gzip"),
        Bytes::new(),
    ];

    for archive in cases {
        let err = t
            .registry
            .publish(archive, &alice, &client())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest, "unexpected error: {}", err);
    }

    let (packages, total) = t.registry.list_packages(None, 50, 0).await.unwrap();
    assert!(packages.is_empty());
    assert_eq!(total, 0);
    assert!(t.blobs.is_empty());
}

#[tokio::test]
async fn test_widgets_permission_scenario() {
    let t = memory_registry();
    let u1 = user(&t.registry, "u1").await;
    let u2 = user(&t.registry, "u2").await;
    let root = admin(&t.registry).await;

    t.registry
        .publish(package_archive("widgets", "1.0.0"), &u1, &client())
        .await
        .unwrap();

    let err = t
        .registry
        .publish(package_archive("widgets", "1.1.0"), &u2, &client())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(!t.blobs.exists("packages/widgets/1.1.0.tar.gz").await.unwrap());
    assert!(t.registry.get_version("widgets", "1.1.0").await.is_err());

    let receipt = t
        .registry
        .publish(package_archive("widgets", "1.1.0"), &root, &client())
        .await
        .unwrap();
    assert!(!receipt.is_new_package);

    // The administrator bypasses grants without acquiring one
    let uploaders = t.registry.list_uploaders("widgets").await.unwrap();
    let emails: Vec<_> = uploaders.iter().map(|u| u.email.as_str()).collect();
    assert_eq!(emails, vec!["u1@example.com"]);

    let audit = wait_for_audit(&t.registry, 2).await;
    assert_eq!(audit.entries[0].action, "package.version.publish");
    assert_eq!(audit.entries[0].user_id.as_ref(), Some(&root.user_id));
    assert_eq!(audit.entries[1].action, "package.publish");
}

#[tokio::test]
async fn test_existing_version_check_runs_after_permission_check() {
    let t = memory_registry();
    let u1 = user(&t.registry, "u1").await;
    let u2 = user(&t.registry, "u2").await;

    t.registry
        .publish(package_archive("widgets", "1.0.0"), &u1, &client())
        .await
        .unwrap();

    let err = t
        .registry
        .publish(package_archive("widgets", "1.0.0"), &u2, &client())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publish_of_same_version() {
    for round in 0..10 {
        let t = memory_registry();
        let alice = user(&t.registry, "alice").await;
        let name = format!("widgets_{}", round);

        let tasks: Vec<_> = (0..2)
            .map(|i| {
                let registry = Arc::clone(&t.registry);
                let alice = alice.clone();
                let archive = package_archive_with_readme(&name, "1.0.0", &format!("copy {}", i));
                tokio::spawn(async move { registry.publish(archive, &alice, &client()).await })
            })
            .collect();

        let mut successes = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::Conflict, "unexpected error: {}", e);
                    conflicts += 1;
                }
            }
        }

        assert_eq!((successes, conflicts), (1, 1));
        let details = t.registry.package_details(&name).await.unwrap();
        assert_eq!(details.versions.len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publish_of_different_versions() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    t.registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();

    let tasks: Vec<_> = ["1.1.0", "1.2.0", "2.0.0"]
        .into_iter()
        .map(|version| {
            let registry = Arc::clone(&t.registry);
            let alice = alice.clone();
            tokio::spawn(async move {
                registry
                    .publish(package_archive("widgets", version), &alice, &client())
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let details = t.registry.package_details("widgets").await.unwrap();
    let versions: Vec<_> = details.versions.iter().map(|v| v.version.as_str()).collect();
    assert_eq!(versions, vec!["2.0.0", "1.2.0", "1.1.0", "1.0.0"]);
    assert_eq!(details.latest.unwrap().version, "2.0.0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_publishers_cannot_swap_the_archive() {
    for round in 0..20 {
        let metadata = Arc::new(MemoryMetadataStorage::new());
        let registry =
            registry_with_storage(metadata, Arc::new(SlowBlobs::new(Duration::from_millis(20))));
        let alice = user(&registry, "alice").await;
        let mallory = user(&registry, "mallory").await;
        let name = format!("widgets_{}", round);

        let tasks: Vec<_> = [(alice, "by alice"), (mallory, "by mallory")]
            .into_iter()
            .map(|(actor, readme)| {
                let registry = Arc::clone(&registry);
                let archive = package_archive_with_readme(&name, "1.0.0", readme);
                tokio::spawn(async move { registry.publish(archive, &actor, &client()).await })
            })
            .collect();

        let mut successes = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(
                    matches!(e.kind(), ErrorKind::Conflict | ErrorKind::Forbidden),
                    "unexpected error: {}",
                    e
                ),
            }
        }
        assert_eq!(successes, 1);

        let version = registry.get_version(&name, "1.0.0").await.unwrap();
        let served = registry.fetch_archive(&name, "1.0.0").await.unwrap();
        assert!(
            ContentAddress::verify(&served, &version.archive_sha256),
            "served archive does not match the recorded digest"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_race_keeps_recorded_digest() {
    let metadata = Arc::new(MemoryMetadataStorage::new());
    let registry =
        registry_with_storage(metadata, Arc::new(SlowBlobs::new(Duration::from_millis(20))));
    let alice = user(&registry, "alice").await;
    registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();

    let tasks: Vec<_> = (0..3)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let alice = alice.clone();
            let archive = package_archive_with_readme("widgets", "2.0.0", &format!("copy {}", i));
            tokio::spawn(async move { registry.publish(archive, &alice, &client()).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().map(|_| ()).map_err(|e| e.kind()));
    }
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes.iter().all(|o| matches!(o, Ok(()) | Err(ErrorKind::Conflict))));

    let version = registry.get_version("widgets", "2.0.0").await.unwrap();
    let served = registry.fetch_archive("widgets", "2.0.0").await.unwrap();
    assert!(ContentAddress::verify(&served, &version.archive_sha256));
}

#[tokio::test]
async fn test_rejected_publish_removes_its_archive() {
    let metadata = Arc::new(FlakyMetadata::new());
    let blobs = Arc::new(MemoryStorage::new());
    let registry = registry_with_storage(metadata.clone(), blobs.clone());
    let alice = user(&registry, "alice").await;
    let mallory = user(&registry, "mallory").await;
    registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();

    // The lookup misses the package, so it only shows up when the name claim fails
    metadata.hide_package_once();
    let err = registry
        .publish(package_archive("widgets", "1.1.0"), &mallory, &client())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(!blobs.exists(&ContentAddress::archive_key("widgets", "1.1.0")).await.unwrap());
    assert_eq!(blobs.list("packages/widgets/").await.unwrap().len(), 1);

    // The version is still free for an uploader
    registry
        .publish(package_archive("widgets", "1.1.0"), &alice, &client())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_publish_does_not_undo_concurrent_discontinue() {
    let metadata = Arc::new(FlakyMetadata::new());
    let registry = registry_with_storage(metadata.clone(), Arc::new(MemoryStorage::new()));
    let alice = user(&registry, "alice").await;
    registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();

    metadata.delay_version_lookups(Duration::from_millis(50));
    let publish = {
        let registry = Arc::clone(&registry);
        let alice = alice.clone();
        tokio::spawn(async move {
            registry
                .publish(package_archive("widgets", "1.1.0"), &alice, &client())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    registry
        .discontinue_package("widgets", Some("gadgets".into()), &alice, &client())
        .await
        .unwrap();

    let receipt = publish.await.unwrap().unwrap();
    assert_eq!(receipt.version.version, "1.1.0");

    let package = registry.get_package("widgets").await.unwrap();
    assert!(package.is_discontinued);
    assert_eq!(package.replaced_by.as_deref(), Some("gadgets"));
}

#[tokio::test]
async fn test_publish_survives_audit_failure() {
    let metadata = Arc::new(FlakyMetadata::new());
    let blobs = Arc::new(MemoryStorage::new());
    let registry = registry_with_storage(metadata.clone(), blobs.clone());
    let alice = user(&registry, "alice").await;
    metadata.break_audit_log();

    let receipt = registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();
    assert!(receipt.is_new_package);

    assert_eq!(
        registry.get_version("widgets", "1.0.0").await.unwrap().archive_sha256,
        receipt.version.archive_sha256
    );
    assert!(blobs.exists(&ContentAddress::archive_key("widgets", "1.0.0")).await.unwrap());

    // Give the detached write time to fail
    tokio::time::sleep(Duration::from_millis(50)).await;
    let page = registry.audit().query(&AuditQuery::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_latest_follows_semver_not_upload_order() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;

    for version in ["1.0.0", "2.0.0", "1.5.0"] {
        t.registry
            .publish(package_archive("widgets", version), &alice, &client())
            .await
            .unwrap();
    }

    let details = t.registry.package_details("widgets").await.unwrap();
    assert_eq!(details.latest.unwrap().version, "2.0.0");

    let (listed, _) = t.registry.list_packages(None, 10, 0).await.unwrap();
    assert_eq!(listed[0].latest.as_ref().unwrap().version, "2.0.0");
}

#[tokio::test]
async fn test_retraction() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    let mallory = user(&t.registry, "mallory").await;

    for version in ["1.0.0", "2.0.0"] {
        t.registry
            .publish(package_archive("widgets", version), &alice, &client())
            .await
            .unwrap();
    }

    let err = t
        .registry
        .retract_version("widgets", "2.0.0", &mallory, &client())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let retracted = t
        .registry
        .retract_version("widgets", "2.0.0", &alice, &client())
        .await
        .unwrap();
    assert!(retracted.is_retracted);

    let details = t.registry.package_details("widgets").await.unwrap();
    assert_eq!(details.versions.len(), 2);
    assert_eq!(details.latest.unwrap().version, "1.0.0");

    // Retracted archives stay downloadable
    assert!(t.registry.fetch_archive("widgets", "2.0.0").await.is_ok());

    let missing = t
        .registry
        .retract_version("widgets", "3.0.0", &alice, &client())
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let audit = wait_for_audit(&t.registry, 3).await;
    assert_eq!(audit.entries[0].action, "package.version.retract");
    assert_eq!(audit.entries[0].resource_type, "version");
    assert_eq!(audit.entries[0].resource_id, retracted.id.to_string());
}

#[tokio::test]
async fn test_discontinue_package() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    t.registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();

    let err = t
        .registry
        .discontinue_package("widgets", Some("Not A Name".into()), &alice, &client())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let package = t
        .registry
        .discontinue_package("widgets", Some("gadgets".into()), &alice, &client())
        .await
        .unwrap();
    assert!(package.is_discontinued);
    assert_eq!(package.replaced_by.as_deref(), Some("gadgets"));

    let stored = t.registry.get_package("widgets").await.unwrap();
    assert!(stored.is_discontinued);
    assert_eq!(stored.replaced_by.as_deref(), Some("gadgets"));
}

#[tokio::test]
async fn test_set_uploaders() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    user(&t.registry, "bob").await;
    let root = admin(&t.registry).await;
    t.registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();

    let forbidden = t
        .registry
        .set_uploaders("widgets", &["bob@example.com".to_string()], &alice, &client())
        .await
        .unwrap_err();
    assert_eq!(forbidden.kind(), ErrorKind::Forbidden);

    let unknown = t
        .registry
        .set_uploaders("widgets", &["nobody@example.com".to_string()], &root, &client())
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    let empty = t
        .registry
        .set_uploaders("widgets", &[], &root, &client())
        .await
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::BadRequest);

    let uploaders = t
        .registry
        .set_uploaders("widgets", &["bob@example.com".to_string()], &root, &client())
        .await
        .unwrap();
    let emails: Vec<_> = uploaders.iter().map(|u| u.email.as_str()).collect();
    assert_eq!(emails, vec!["bob@example.com"]);

    // Alice lost her grant
    let err = t
        .registry
        .publish(package_archive("widgets", "1.1.0"), &alice, &client())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let audit = wait_for_audit(&t.registry, 3).await;
    let actions: Vec<_> = audit.entries.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"package.uploader.add"));
    assert!(actions.contains(&"package.uploader.remove"));
}

#[tokio::test]
async fn test_fetch_archive() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    let archive = package_archive("widgets", "1.0.0");
    t.registry.publish(archive.clone(), &alice, &client()).await.unwrap();

    assert_eq!(t.registry.fetch_archive("widgets", "1.0.0").await.unwrap(), archive);

    for (name, version) in [("widgets", "9.0.0"), ("../etc", "1.0.0"), ("widgets", "../../x")] {
        let err = t.registry.fetch_archive(name, version).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[tokio::test]
async fn test_publish_succeeds_when_queue_is_shut_down() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    t.registry.jobs().shutdown();

    let receipt = t
        .registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();

    assert!(receipt.docs_job.is_none());
    assert!(t.registry.get_version("widgets", "1.0.0").await.is_ok());
}

#[tokio::test]
async fn test_audit_log_requires_admin() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;
    let root = admin(&t.registry).await;
    t.registry
        .publish(package_archive("widgets", "1.0.0"), &alice, &client())
        .await
        .unwrap();
    wait_for_audit(&t.registry, 1).await;

    let err = t
        .registry
        .query_audit(&AuditQuery::default(), &alice)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let page = t
        .registry
        .query_audit(
            &AuditQuery {
                action: Some("package.publish".into()),
                ..Default::default()
            },
            &root,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_authentication() {
    let t = memory_registry();
    let alice = user(&t.registry, "alice").await;

    let found = t.registry.authenticate("alice-token").await.unwrap().unwrap();
    assert_eq!(found.id, alice.user_id);
    assert!(t.registry.authenticate("wrong").await.unwrap().is_none());
    assert!(t.registry.authenticate("").await.unwrap().is_none());

    // Bootstrapping is idempotent
    let again = t
        .registry
        .ensure_user("alice@example.com", false, "other-token")
        .await
        .unwrap();
    assert_eq!(again.id, alice.user_id);
}
