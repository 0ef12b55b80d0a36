const DEFAULT_SITE_NAME: &str = "Stream CMS";

/// Hosting platforms whose first label is the project name.
const PLATFORM_SUFFIXES: [&str; 3] = [".vercel.app", ".netlify.app", ".github.io"];

/// The display name of the site: `configured` when set, otherwise derived from the request host.
///
/// `my-movie-site.vercel.app` becomes "My Movie Site", `www.cinema_club.com` becomes
/// "Cinema Club", and local hosts fall back to the default name.
pub fn site_name(configured: Option<&str>, host: Option<&str>) -> String {
    if let Some(name) = configured.map(str::trim).filter(|name| !name.is_empty()) {
        return name.to_string();
    }

    host.and_then(project_label)
        .map(|label| title_case(&label))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_SITE_NAME.to_string())
}

fn project_label(host: &str) -> Option<String> {
    let host = host.trim().to_ascii_lowercase();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(&host);
    let host = host.split('/').next().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    let host = host.strip_prefix("www.").unwrap_or(host);

    if host.is_empty() || host == "localhost" || host == "127.0.0.1" {
        return None;
    }

    if PLATFORM_SUFFIXES.iter().any(|suffix| host.ends_with(suffix)) {
        return host.split('.').next().map(str::to_string);
    }

    match host.rsplit_once('.') {
        Some((name, _tld)) => Some(name.to_string()),
        None => Some(host.to_string()),
    }
}

fn title_case(label: &str) -> String {
    label
        .split(['-', '_', '.'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
