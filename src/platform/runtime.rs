use std::future::Future;
use std::time::Duration;

/// Boxed future that is `Send` wherever the platform's spawner requires it.
#[cfg(not(target_arch = "wasm32"))]
pub type PlatformFuture<'a, T> = futures::future::BoxFuture<'a, T>;
/// Boxed future that is `Send` wherever the platform's spawner requires it.
#[cfg(target_arch = "wasm32")]
pub type PlatformFuture<'a, T> = futures::future::LocalBoxFuture<'a, T>;

/// Runs a timer or write task in the background without awaiting it.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Runs a timer or write task in the background without awaiting it.
///
/// Inside a tokio runtime the task joins that runtime, so paused-clock tests drive it.
/// Outside one, a shared single-worker runtime picks it up.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use std::sync::LazyLock;
    use tokio::runtime::{Builder, Handle, Runtime};

    static BACKGROUND_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("firestore-orm-background")
            .enable_all()
            .build()
            .expect("failed to build background tokio runtime")
    });

    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => {
            BACKGROUND_RUNTIME.spawn(future);
        }
    }
}

pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    #[cfg(target_arch = "wasm32")]
    gloo_timers::future::sleep(duration).await;

    #[cfg(not(target_arch = "wasm32"))]
    tokio::time::sleep(duration).await;
}
