use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cast_dispatch::config::OwnerConfig;
use cast_dispatch::credentials::{
    ConfigCredentialSource, CredentialClientPool, CredentialSource, OwnerCredentials,
};
use cast_dispatch::{AppError, Result};

/// Source that counts lookups and serves a swappable display name.
struct CountingSource {
    lookups: AtomicUsize,
    display_name: Mutex<String>,
}

impl CountingSource {
    fn new(display_name: &str) -> Self {
        Self {
            lookups: AtomicUsize::new(0),
            display_name: Mutex::new(display_name.to_owned()),
        }
    }

    fn rename(&self, display_name: &str) {
        *self.display_name.lock().unwrap() = display_name.to_owned();
    }
}

impl CredentialSource for CountingSource {
    fn lookup<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OwnerCredentials>>> + Send + 'a>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if owner_id != "cast-a" {
                return Ok(None);
            }
            Ok(Some(OwnerCredentials {
                owner_id: owner_id.to_owned(),
                account_id: Some("acct-a".into()),
                display_name: self.display_name.lock().unwrap().clone(),
                relay_sheet: "cast-a".into(),
                direct_api: true,
                api_token: Some("token".into()),
            }))
        })
    }
}

fn pool(source: &Arc<CountingSource>) -> CredentialClientPool {
    CredentialClientPool::new(
        Arc::clone(source) as Arc<dyn CredentialSource>,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn clients_are_cached_per_owner() {
    let source = Arc::new(CountingSource::new("Cast A"));
    let pool = pool(&source);

    let first = pool.get("cast-a").await.expect("first lookup");
    let second = pool.get("cast-a").await.expect("cached lookup");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(first.credentials.direct_account(), Some("acct-a"));
}

#[tokio::test]
async fn unknown_owner_is_a_credential_error() {
    let source = Arc::new(CountingSource::new("Cast A"));
    let err = pool(&source).get("cast-z").await.unwrap_err();
    assert!(matches!(err, AppError::Credential(ref m) if m.contains("cast-z")));
}

#[tokio::test]
async fn refresh_picks_up_changed_credentials() {
    let source = Arc::new(CountingSource::new("Cast A"));
    let pool = pool(&source);

    let before = pool.get("cast-a").await.unwrap();
    source.rename("Cast A (renamed)");

    let still_cached = pool.get("cast-a").await.unwrap();
    assert_eq!(still_cached.credentials.display_name, "Cast A");

    let refreshed = pool.refresh("cast-a").await.unwrap();
    assert!(!Arc::ptr_eq(&before, &refreshed));
    assert_eq!(refreshed.credentials.display_name, "Cast A (renamed)");
    assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidate_forces_a_new_lookup() {
    let source = Arc::new(CountingSource::new("Cast A"));
    let pool = pool(&source);

    pool.get("cast-a").await.unwrap();
    pool.invalidate("cast-a").await;
    pool.invalidate("never-cached").await;
    pool.get("cast-a").await.unwrap();
    pool.invalidate_all().await;
    pool.get("cast-a").await.unwrap();

    assert_eq!(source.lookups.load(Ordering::SeqCst), 3);
}

#[test]
fn direct_account_requires_opt_in() {
    let mut creds = OwnerCredentials {
        owner_id: "cast-a".into(),
        account_id: Some("acct".into()),
        display_name: "A".into(),
        relay_sheet: "cast-a".into(),
        direct_api: false,
        api_token: None,
    };
    assert_eq!(creds.direct_account(), None);

    creds.direct_api = true;
    assert_eq!(creds.direct_account(), Some("acct"));

    creds.account_id = None;
    assert_eq!(creds.direct_account(), None);
}

#[tokio::test]
#[serial_test::serial]
async fn config_source_maps_owner_table() {
    let owners = vec![
        OwnerConfig {
            id: "cast-a".into(),
            account_id: Some("acct-a".into()),
            display_name: "Cast A".into(),
            relay_sheet: None,
            direct_api: true,
        },
        OwnerConfig {
            id: "cast-b".into(),
            account_id: None,
            display_name: "Cast B".into(),
            relay_sheet: Some("sheet-b".into()),
            direct_api: false,
        },
    ];
    let source = ConfigCredentialSource::new(&owners, false);

    let a = source.lookup("cast-a").await.unwrap().expect("cast-a");
    assert_eq!(a.relay_sheet, "cast-a");
    assert_eq!(a.direct_account(), Some("acct-a"));

    let b = source.lookup("cast-b").await.unwrap().expect("cast-b");
    assert_eq!(b.relay_sheet, "sheet-b");
    assert_eq!(b.direct_account(), None);

    assert!(source.lookup("cast-c").await.unwrap().is_none());
}
