// This file is part of Courier.
//
// Courier is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Courier is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Courier.
// If not, see https://www.gnu.org/licenses/.

//! Utilities for working with spawned task handles.

use anyhow::Context;
use futures::Future;
use tokio::task::JoinHandle;

/// Flatten a JoinHandle result.
///
/// Merges the task's own error with a join error (panic or cancellation),
/// so handles can be raced with `tokio::select!` or `try_join!`.
pub async fn flatten_handle<T>(handle: JoinHandle<anyhow::Result<T>>) -> anyhow::Result<T> {
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err),
        Err(err) => Err(err).context("task failed to complete"),
    }
}

/// Spawn a named task whose result is logged when it finishes.
pub fn spawn_named<F, T>(name: &'static str, fut: F) -> JoinHandle<anyhow::Result<T>>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(async move {
        let res = fut.await;
        match &res {
            Ok(_) => tracing::info!("Task {name} finished"),
            Err(e) => tracing::error!("Task {name} failed: {e:?}"),
        }
        res
    })
}
