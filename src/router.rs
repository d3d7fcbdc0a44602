//! Classification of raw sample names into delivery destinations.
//!
//! Routing is a pure function over the dot-delimited name: the first segment
//! selects a category, some categories consume further segments as
//! qualifiers that move from the name into the identity string.  A name that
//! matches no rule, or matches a rule but is missing the segments the rule
//! expects, is dropped rather than raised -- malformed names are steady-state
//! noise and must never abort an export cycle.

use tracing::warn;

use crate::common::{Destination, RoutedSample, Sample};

/// Routing knobs that vary per deployment.
#[derive(Debug, Clone)]
pub(crate) struct RouterConfig {
    /// First segment under which the collection engine reports its own
    /// health metrics.  Routed alongside `jvm`.
    pub(crate) collector_namespace: String,
    /// First segments carrying application business metrics.
    pub(crate) application_namespaces: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            collector_namespace: "collector".to_owned(),
            application_namespaces: Vec::new(),
        }
    }
}

/// Routes one sample, returning the destination bucket and the rewritten
/// sample, or `None` when the sample has no matching rule.
pub(crate) fn route(
    sample: &Sample,
    pid_host: &str,
    config: &RouterConfig,
) -> Option<(Destination, RoutedSample)> {
    if sample.name.is_empty() {
        warn!("dropping sample with empty name");
        return None;
    }

    let parts: Vec<&str> = sample.name.split('.').collect();
    let first = parts[0];

    if first == "jvm" || first == config.collector_namespace {
        let routed = rewrite(sample, sample.name.clone(), pid_host.to_owned());
        return Some((Destination::Jvm, routed));
    }

    if first == "tomcat" {
        return route_tomcat(sample, &parts, pid_host);
    }

    // Website visitor counts ride along with the tomcat group.
    if first == "website" {
        if parts.get(1).copied() == Some("visitors") && parts.len() >= 3 {
            let name = format!("tomcat.website.visitors.{}", parts[2]);
            let routed = rewrite(sample, name, pid_host.to_owned());
            return Some((Destination::Tomcat, routed));
        }
        return None;
    }

    if config.application_namespaces.iter().any(|ns| ns == first) {
        let routed = rewrite(sample, sample.name.clone(), pid_host.to_owned());
        return Some((Destination::Application, routed));
    }

    None
}

fn route_tomcat(
    sample: &Sample,
    parts: &[&str],
    pid_host: &str,
) -> Option<(Destination, RoutedSample)> {
    let routed = match *parts.get(1)? {
        // [tomcat, <subtype>, connector, metric]
        "thread-pool" | "global-request-processor" => {
            if parts.len() < 4 {
                return None;
            }
            let name = format!("{}.{}.{}", parts[0], parts[1], parts[3]);
            let identity = format!("{}.{}", pid_host, parts[2]);
            rewrite(sample, name, identity)
        }
        // [tomcat, manager, host, context, metric]
        "manager" => {
            if parts.len() < 5 {
                return None;
            }
            let name = format!("tomcat.manager.{}", parts[4]);
            let identity = format!("{}.{}.{}", pid_host, parts[2], parts[3]);
            rewrite(sample, name, identity)
        }
        // [tomcat, servlet, webmodule, servletname, metric]
        "servlet" => {
            if parts.len() < 5 {
                return None;
            }
            let mut webmodule = parts[2].to_owned();
            // The container's built-in servlets serve the module root.
            if parts[3] == "default" || parts[3] == "jsp" {
                webmodule.push_str("ROOT");
            }
            let name = format!("tomcat.servlet.{}", parts[4]);
            let identity = format!("{}.{}.{}", pid_host, webmodule, parts[3]);
            rewrite(sample, name, identity)
        }
        // [tomcat, data-source, host, context, dbname, metric]
        "data-source" => {
            if parts.len() < 6 {
                return None;
            }
            let name = format!("tomcat.data-source.{}", parts[5]);
            let identity = format!("{}.{}.{}.{}", pid_host, parts[2], parts[3], parts[4]);
            rewrite(sample, name, identity)
        }
        _ => return None,
    };

    Some((Destination::Tomcat, routed))
}

fn rewrite(sample: &Sample, name: String, identity: String) -> RoutedSample {
    RoutedSample {
        name,
        identity,
        value: sample.value,
        epoch_millis: sample.epoch_millis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PID_HOST: &str = "web01.4242";

    fn sample(name: &str) -> Sample {
        Sample::new(name, 1i64, 1_000)
    }

    fn route_one(name: &str) -> Option<(Destination, RoutedSample)> {
        route(&sample(name), PID_HOST, &RouterConfig::default())
    }

    #[test]
    fn jvm_names_pass_through() {
        let (dest, routed) = route_one("jvm.memory.used").unwrap();
        assert_eq!(dest, Destination::Jvm);
        assert_eq!(routed.name, "jvm.memory.used");
        assert_eq!(routed.identity, PID_HOST);
    }

    #[test]
    fn collector_namespace_routes_like_jvm() {
        let (dest, routed) = route_one("collector.exports.count").unwrap();
        assert_eq!(dest, Destination::Jvm);
        assert_eq!(routed.name, "collector.exports.count");
    }

    #[test]
    fn thread_pool_drops_connector_from_name() {
        let (dest, routed) = route_one("tomcat.thread-pool.http-8080.currentThreadCount").unwrap();
        assert_eq!(dest, Destination::Tomcat);
        assert_eq!(routed.name, "tomcat.thread-pool.currentThreadCount");
        assert_eq!(routed.identity, "web01.4242.http-8080");
    }

    #[test]
    fn thread_pool_rewrites_have_three_segments_and_connector_identity() {
        let connectors = ["http-8080", "ajp-8009", "http-nio-8443"];
        for connector in connectors {
            let name = format!("tomcat.thread-pool.{connector}.currentThreadsBusy");
            let (_, routed) = route_one(&name).unwrap();
            assert_eq!(routed.name.split('.').count(), 3);
            assert!(routed.identity.ends_with(&format!(".{connector}")));
        }
    }

    #[test]
    fn global_request_processor_follows_thread_pool_rule() {
        let (_, routed) = route_one("tomcat.global-request-processor.http-8080.requestCount").unwrap();
        assert_eq!(routed.name, "tomcat.global-request-processor.requestCount");
        assert_eq!(routed.identity, "web01.4242.http-8080");
    }

    #[test]
    fn manager_consumes_host_and_context() {
        let (_, routed) = route_one("tomcat.manager.localhost.shop.activeSessions").unwrap();
        assert_eq!(routed.name, "tomcat.manager.activeSessions");
        assert_eq!(routed.identity, "web01.4242.localhost.shop");
    }

    #[test]
    fn servlet_keeps_webmodule_and_servlet_in_identity() {
        let (_, routed) = route_one("tomcat.servlet.app.myservlet.processingTime").unwrap();
        assert_eq!(routed.name, "tomcat.servlet.processingTime");
        assert_eq!(routed.identity, "web01.4242.app.myservlet");
    }

    #[test]
    fn builtin_servlets_mark_the_module_root() {
        let (_, routed) = route_one("tomcat.servlet.app.default.processingTime").unwrap();
        assert_eq!(routed.identity, "web01.4242.appROOT.default");

        let (_, routed) = route_one("tomcat.servlet.app.jsp.processingTime").unwrap();
        assert_eq!(routed.identity, "web01.4242.appROOT.jsp");
    }

    #[test]
    fn data_source_consumes_three_qualifiers() {
        let (_, routed) =
            route_one("tomcat.data-source.localhost.shop.orders.numActive").unwrap();
        assert_eq!(routed.name, "tomcat.data-source.numActive");
        assert_eq!(routed.identity, "web01.4242.localhost.shop.orders");
    }

    #[test]
    fn website_visitors_land_in_the_tomcat_group() {
        let (dest, routed) = route_one("website.visitors.unique").unwrap();
        assert_eq!(dest, Destination::Tomcat);
        assert_eq!(routed.name, "tomcat.website.visitors.unique");
        assert_eq!(routed.identity, PID_HOST);
    }

    #[test]
    fn application_namespaces_are_configurable() {
        let config = RouterConfig {
            application_namespaces: vec!["sales".to_owned(), "cocktail".to_owned()],
            ..Default::default()
        };
        let (dest, routed) = route(&sample("sales.orders.count"), PID_HOST, &config).unwrap();
        assert_eq!(dest, Destination::Application);
        assert_eq!(routed.name, "sales.orders.count");
        assert_eq!(routed.identity, PID_HOST);

        // Not routed without configuration.
        assert!(route_one("sales.orders.count").is_none());
    }

    #[test]
    fn unrecognized_names_are_dropped_not_raised() {
        for name in [
            "nope",
            "nope.some.metric",
            "tomcat.unknown-subsystem.x.y",
            "website.sessions.active",
            "",
        ] {
            assert!(route_one(name).is_none(), "{name:?} should be dropped");
        }
    }

    #[test]
    fn truncated_names_are_a_routing_miss_not_a_panic() {
        for name in [
            "tomcat.thread-pool.http-8080",
            "tomcat.manager.localhost.shop",
            "tomcat.servlet.app.default",
            "tomcat.data-source.localhost.shop.orders",
            "tomcat",
            "website.visitors",
        ] {
            assert!(route_one(name).is_none(), "{name:?} should be dropped");
        }
    }
}
