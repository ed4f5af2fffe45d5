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

use std::{net::SocketAddr, time::Duration};

use courier_utils::handle::spawn_named;
use itertools::Itertools;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_process::Collector;
use metrics_util::layers::{PrefixLayer, Stack};

/// Install the Prometheus recorder, prefixing every metric with `courier`, and
/// start sampling process metrics.
pub fn initialize<'a>(
    sample_interval_millis: u64,
    listen_addr: SocketAddr,
    tags: impl IntoIterator<Item = &'a String>,
) -> anyhow::Result<()> {
    let mut builder = PrometheusBuilder::new().with_http_listener(listen_addr);
    for (k, v) in parse_tags(tags) {
        builder = builder.add_global_label(k, v);
    }

    let (recorder, exporter) = builder.build()?;
    spawn_named("metrics exporter", async move {
        exporter
            .await
            .map_err(|_| anyhow::anyhow!("metrics exporter failed"))
    });
    Stack::new(recorder)
        .push(PrefixLayer::new("courier"))
        .install()?;

    tokio::spawn(async move {
        let collector = Collector::default();
        collector.describe();
        loop {
            collector.collect();
            tokio::time::sleep(Duration::from_millis(sample_interval_millis)).await;
        }
    });

    Ok(())
}

fn parse_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> Vec<(&'a str, &'a str)> {
    tags.into_iter()
        .filter_map(|t| t.split('=').collect_tuple())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        let tags = vec![
            "env=prod".to_string(),
            "malformed".to_string(),
            "a=b=c".to_string(),
            "region=us".to_string(),
        ];
        assert_eq!(parse_tags(&tags), vec![("env", "prod"), ("region", "us")]);
    }
}
