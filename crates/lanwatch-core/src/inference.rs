//! Device type inference
//!
//! Classifies a device from its vendor, hostname, advertised service types
//! and service-discovery name. Rules are evaluated in tiers: advertised
//! services first, then hostname patterns, then vendor defaults.

use crate::device::DeviceType;

/// Classification result: category, OS hint, model hint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inference {
    pub device_type: DeviceType,
    pub os_hint: Option<&'static str>,
    pub model_hint: Option<&'static str>,
}

impl Inference {
    const UNKNOWN: Inference = Inference {
        device_type: DeviceType::Unknown,
        os_hint: None,
        model_hint: None,
    };
}

/// Service advertisement types mapped to categories
const SERVICE_TYPES: &[(&str, DeviceType)] = &[
    ("_printer._tcp", DeviceType::Printer),
    ("_ipp._tcp", DeviceType::Printer),
    ("_ipps._tcp", DeviceType::Printer),
    ("_scanner._tcp", DeviceType::Printer),
    ("_airplay._tcp", DeviceType::Tv),
    ("_googlecast._tcp", DeviceType::Tv),
    ("_raop._tcp", DeviceType::Speaker),
    ("_spotify-connect._tcp", DeviceType::Speaker),
    ("_hap._tcp", DeviceType::Iot),
    ("_homekit._tcp", DeviceType::Iot),
    ("_companion-link._tcp", DeviceType::Phone),
    ("_apple-mobdev2._tcp", DeviceType::Phone),
    ("_smb._tcp", DeviceType::Desktop),
    ("_afpovertcp._tcp", DeviceType::Desktop),
    ("_ssh._tcp", DeviceType::Desktop),
];

struct HostnameRule {
    needles: &'static [&'static str],
    device_type: DeviceType,
    os_hint: Option<&'static str>,
    model_hint: Option<&'static str>,
}

const fn rule(
    needles: &'static [&'static str],
    device_type: DeviceType,
    os_hint: Option<&'static str>,
    model_hint: Option<&'static str>,
) -> HostnameRule {
    HostnameRule {
        needles,
        device_type,
        os_hint,
        model_hint,
    }
}

/// Case-insensitive word rules, first match wins
const HOSTNAME_RULES: &[HostnameRule] = &[
    rule(&["iphone"], DeviceType::Phone, Some("iOS"), Some("iPhone")),
    rule(&["ipad"], DeviceType::Tablet, Some("iPadOS"), Some("iPad")),
    rule(&["macbook", "mbp", "mba"], DeviceType::Laptop, Some("macOS"), Some("MacBook")),
    rule(
        &["imac", "macpro", "mac-pro", "macmini", "mac-mini", "macstudio", "mac-studio"],
        DeviceType::Desktop,
        Some("macOS"),
        None,
    ),
    rule(&["apple-watch", "applewatch"], DeviceType::Watch, Some("watchOS"), Some("Apple Watch")),
    rule(&["apple-tv", "appletv", "apple tv"], DeviceType::Tv, Some("tvOS"), Some("Apple TV")),
    rule(&["homepod"], DeviceType::Speaker, None, Some("HomePod")),
    rule(
        &["android", "pixel", "galaxy", "oneplus", "redmi"],
        DeviceType::Phone,
        Some("Android"),
        None,
    ),
    rule(&["echo", "alexa"], DeviceType::Speaker, None, Some("Amazon Echo")),
    rule(&["fire-tv", "firetv", "firestick"], DeviceType::Tv, None, Some("Fire TV")),
    rule(&["chromecast"], DeviceType::Tv, None, Some("Chromecast")),
    rule(&["roku"], DeviceType::Tv, None, Some("Roku")),
    rule(&["playstation", "ps3", "ps4", "ps5"], DeviceType::Gaming, None, Some("PlayStation")),
    rule(&["xbox"], DeviceType::Gaming, None, Some("Xbox")),
    rule(&["nintendo"], DeviceType::Gaming, None, Some("Nintendo Switch")),
    rule(&["printer", "laserjet", "deskjet", "officejet"], DeviceType::Printer, None, None),
    rule(&["camera", "doorbell", "ipcam", "webcam"], DeviceType::Camera, None, None),
    rule(&["watch"], DeviceType::Watch, None, None),
    rule(
        &["television", "smarttv", "bravia", "webos", "tizen"],
        DeviceType::Tv,
        None,
        None,
    ),
    rule(&["sonos", "speaker"], DeviceType::Speaker, None, None),
    rule(&["raspberry", "raspi", "rpi"], DeviceType::Iot, Some("Linux"), Some("Raspberry Pi")),
    rule(&["desktop", "workstation"], DeviceType::Desktop, Some("Windows"), None),
    rule(&["laptop", "notebook", "surface"], DeviceType::Laptop, Some("Windows"), None),
];

/// Vendor words mapped to default categories. More specific entries
/// come before broader ones sharing a prefix.
const VENDOR_DEFAULTS: &[(&str, DeviceType)] = &[
    // Network equipment
    ("cisco", DeviceType::Router),
    ("huawei", DeviceType::Router),
    ("netgear", DeviceType::Router),
    ("tp-link", DeviceType::Router),
    ("linksys", DeviceType::Router),
    ("d-link", DeviceType::Router),
    ("ubiquiti", DeviceType::Router),
    ("aruba", DeviceType::Router),
    ("mikrotik", DeviceType::Router),
    ("zyxel", DeviceType::Router),
    ("asus", DeviceType::Router),
    // Smart home
    ("espressif", DeviceType::Iot),
    ("tuya", DeviceType::Iot),
    ("shelly", DeviceType::Iot),
    ("sonoff", DeviceType::Iot),
    ("xiaomi", DeviceType::Iot),
    ("philips", DeviceType::Iot),
    ("signify", DeviceType::Iot),
    ("nest", DeviceType::Iot),
    ("raspberry", DeviceType::Iot),
    ("ring", DeviceType::Camera),
    ("wyze", DeviceType::Camera),
    ("eufy", DeviceType::Camera),
    ("arlo", DeviceType::Camera),
    // Media
    ("samsung electro", DeviceType::Tv),
    ("lg electronics", DeviceType::Tv),
    ("roku", DeviceType::Tv),
    ("tcl", DeviceType::Tv),
    ("vizio", DeviceType::Tv),
    ("hisense", DeviceType::Tv),
    ("sonos", DeviceType::Speaker),
    ("bose", DeviceType::Speaker),
    ("harman", DeviceType::Speaker),
    // Phones
    ("samsung", DeviceType::Phone),
    ("oneplus", DeviceType::Phone),
    ("oppo", DeviceType::Phone),
    ("vivo", DeviceType::Phone),
    ("motorola", DeviceType::Phone),
    ("google", DeviceType::Phone),
    // Gaming
    ("sony", DeviceType::Gaming),
    ("nintendo", DeviceType::Gaming),
    ("valve", DeviceType::Gaming),
    ("microsoft", DeviceType::Gaming),
    // Printers
    ("epson", DeviceType::Printer),
    ("hewlett", DeviceType::Printer),
    ("hp inc", DeviceType::Printer),
    ("canon", DeviceType::Printer),
    ("brother", DeviceType::Printer),
    ("xerox", DeviceType::Printer),
    // Computers
    ("intel", DeviceType::Desktop),
    ("dell", DeviceType::Desktop),
    ("lenovo", DeviceType::Desktop),
    ("asrock", DeviceType::Desktop),
    ("gigabyte", DeviceType::Desktop),
    ("apple", DeviceType::Laptop),
];

/// Classify a device. Deterministic and side-effect free.
pub fn infer(
    vendor: Option<&str>,
    hostname: Option<&str>,
    services: &[String],
    service_name: Option<&str>,
) -> Inference {
    let hostname_match = match_hostname(hostname, service_name);

    if let Some(device_type) = match_services(services) {
        // Hints only carry over when the name agrees with the services
        let (os_hint, model_hint) = match hostname_match {
            Some(rule) if rule.device_type == device_type => (rule.os_hint, rule.model_hint),
            _ => (None, None),
        };
        return Inference {
            device_type,
            os_hint,
            model_hint,
        };
    }

    if let Some(rule) = hostname_match {
        return Inference {
            device_type: rule.device_type,
            os_hint: rule.os_hint,
            model_hint: rule.model_hint,
        };
    }

    match vendor.and_then(match_vendor) {
        Some(device_type) => Inference {
            device_type,
            os_hint: None,
            model_hint: None,
        },
        None => Inference::UNKNOWN,
    }
}

fn match_services(services: &[String]) -> Option<DeviceType> {
    // Table order decides between several advertised services
    SERVICE_TYPES.iter().find_map(|(service, device_type)| {
        services
            .iter()
            .any(|s| normalize_service(s) == *service)
            .then_some(*device_type)
    })
}

/// `_ipp._tcp.local.` and `_ipp._tcp` compare equal
fn normalize_service(service: &str) -> &str {
    service
        .trim_end_matches('.')
        .trim_end_matches(".local")
}

fn match_hostname(hostname: Option<&str>, service_name: Option<&str>) -> Option<&'static HostnameRule> {
    let candidates: Vec<Vec<String>> = [hostname, service_name].into_iter().flatten().map(tokens).collect();
    if candidates.is_empty() {
        return None;
    }

    HOSTNAME_RULES.iter().find(|rule| {
        candidates
            .iter()
            .any(|name| rule.needles.iter().any(|needle| matches_needle(name, needle)))
    })
}

fn match_vendor(vendor: &str) -> Option<DeviceType> {
    let vendor = tokens(vendor);
    VENDOR_DEFAULTS
        .iter()
        .find(|(needle, _)| matches_needle(&vendor, needle))
        .map(|(_, device_type)| *device_type)
}

/// Lowercase alphanumeric words
fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Needle words must appear consecutively and start at word boundaries.
/// The last needle word may be a prefix ("asus" matches "ASUSTek",
/// "raspberry" matches "raspberrypi"); earlier words must match whole.
fn matches_needle(words: &[String], needle: &str) -> bool {
    let parts: Vec<&str> = needle
        .split(|c: char| !c.is_alphanumeric())
        .filter(|p| !p.is_empty())
        .collect();
    let Some((last, head)) = parts.split_last() else {
        return false;
    };

    words.windows(parts.len()).any(|window| {
        window.iter().zip(head).all(|(word, part)| word == part) && window[head.len()].starts_with(last)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_vendor_default_router() {
        let result = infer(Some("Cisco"), None, &[], None);
        assert_eq!(result.device_type, DeviceType::Router);
        assert_eq!(result.os_hint, None);
        assert_eq!(result.model_hint, None);
    }

    #[test]
    fn test_vendor_specific_entry_before_broad() {
        assert_eq!(
            infer(Some("Samsung Electronics Co.,Ltd"), None, &[], None).device_type,
            DeviceType::Tv
        );
        assert_eq!(infer(Some("SAMSUNG"), None, &[], None).device_type, DeviceType::Phone);
    }

    #[test]
    fn test_unknown_when_no_signal() {
        assert_eq!(infer(None, None, &[], None), Inference::UNKNOWN);
        assert_eq!(
            infer(Some("Obscure Widgets Ltd"), Some("box-17"), &services(&["_foo._tcp"]), None),
            Inference::UNKNOWN
        );
    }

    #[test]
    fn test_hostname_rule_with_hints() {
        let result = infer(Some("Apple, Inc."), Some("Janes-iPhone.lan"), &[], None);
        assert_eq!(result.device_type, DeviceType::Phone);
        assert_eq!(result.os_hint, Some("iOS"));
        assert_eq!(result.model_hint, Some("iPhone"));
    }

    #[test]
    fn test_hostname_beats_vendor() {
        let result = infer(Some("Cisco"), Some("office-laserjet"), &[], None);
        assert_eq!(result.device_type, DeviceType::Printer);
    }

    #[test]
    fn test_service_name_matched_like_hostname() {
        let result = infer(None, None, &[], Some("Living Room Apple TV"));
        assert_eq!(result.device_type, DeviceType::Tv);
        assert_eq!(result.model_hint, Some("Apple TV"));
    }

    #[test]
    fn test_services_beat_hostname() {
        let result = infer(
            Some("Apple, Inc."),
            Some("studio-macbook"),
            &services(&["_ipp._tcp"]),
            None,
        );
        assert_eq!(result.device_type, DeviceType::Printer);
        // MacBook hints disagree with the printer category and are dropped
        assert_eq!(result.os_hint, None);
        assert_eq!(result.model_hint, None);
    }

    #[test]
    fn test_services_keep_agreeing_hints() {
        let result = infer(None, Some("apple-tv"), &services(&["_airplay._tcp.local."]), None);
        assert_eq!(result.device_type, DeviceType::Tv);
        assert_eq!(result.os_hint, Some("tvOS"));
        assert_eq!(result.model_hint, Some("Apple TV"));
    }

    #[test]
    fn test_printer_service_wins_over_airplay() {
        let result = infer(None, None, &services(&["_airplay._tcp", "_printer._tcp"]), None);
        assert_eq!(result.device_type, DeviceType::Printer);
    }

    #[test]
    fn test_vendor_needles_need_word_boundary() {
        for vendor in [
            "Murata Manufacturing Co., Ltd.",
            "Hon Hai Precision Engineering",
            "Shenzhen Bilian Electronic",
            "Universal Global Scientific Industrial",
        ] {
            assert_eq!(infer(Some(vendor), None, &[], None).device_type, DeviceType::Unknown, "{vendor}");
        }
        assert_eq!(infer(Some("Ring LLC"), None, &[], None).device_type, DeviceType::Camera);
        assert_eq!(
            infer(Some("ASUSTek COMPUTER INC."), None, &[], None).device_type,
            DeviceType::Router
        );
        assert_eq!(infer(Some("HP Inc."), None, &[], None).device_type, DeviceType::Printer);
    }

    #[test]
    fn test_short_hostname_needles_need_word_boundary() {
        assert_eq!(infer(None, Some("nimba.lan"), &[], None), Inference::UNKNOWN);
        assert_eq!(infer(None, Some("crpicker"), &[], None), Inference::UNKNOWN);
        assert_eq!(infer(None, Some("lechon"), &[], None), Inference::UNKNOWN);

        assert_eq!(infer(None, Some("mba-2020"), &[], None).device_type, DeviceType::Laptop);
        assert_eq!(infer(None, Some("rpi4-garage"), &[], None).device_type, DeviceType::Iot);
        assert_eq!(infer(None, Some("echo-dot"), &[], None).device_type, DeviceType::Speaker);
        assert_eq!(infer(None, Some("raspberrypi.local"), &[], None).device_type, DeviceType::Iot);
    }

    #[test]
    fn test_deterministic() {
        let svc = services(&["_raop._tcp"]);
        let a = infer(Some("Sonos"), Some("kitchen"), &svc, Some("Kitchen"));
        let b = infer(Some("Sonos"), Some("kitchen"), &svc, Some("Kitchen"));
        assert_eq!(a, b);
        assert_eq!(a.device_type, DeviceType::Speaker);
    }
}
