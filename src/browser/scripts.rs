//! JavaScript evaluated inside the probed page.
//!
//! Each script is a WebDriver "execute" body: it must `return` a JSON-able
//! value. Selector and keyword lists live here as Rust constants and are
//! spliced into the sources as JSON literals.

use serde::Serialize;

/// A tracking integration recognised by the globals it defines.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerProbe {
    pub label: &'static str,
    pub globals: &'static [&'static str],
    /// The global must be an array, not just defined.
    pub require_array: bool,
}

/// Evaluated in order; detected labels keep this order.
pub const TRACKERS: &[TrackerProbe] = &[
    TrackerProbe {
        label: "Facebook Pixel",
        globals: &["fbq"],
        require_array: false,
    },
    TrackerProbe {
        label: "Google Analytics",
        globals: &["ga", "gtag"],
        require_array: false,
    },
    TrackerProbe {
        label: "Google Tag Manager",
        globals: &["dataLayer"],
        require_array: true,
    },
    TrackerProbe {
        label: "Google Ads",
        globals: &["google_trackConversion"],
        require_array: false,
    },
    TrackerProbe {
        label: "LinkedIn Insight",
        globals: &["_linkedin_data_partner_ids"],
        require_array: false,
    },
];

/// Visible-text fragments that mark a link or button as a call to action.
pub const CTA_KEYWORDS: &[&str] = &[
    "contact",
    "devis",
    "appel",
    "rdv",
    "essai",
    "demo",
    "commencer",
    "inscription",
];

pub const EMAIL_SELECTOR: &str =
    r#"input[type="email"], input[name*="email" i], input[id*="email" i]"#;
pub const NAME_SELECTOR: &str = r#"input[type="text"], input[name*="name" i], input[name*="nom" i], input[placeholder*="nom" i]"#;
pub const SUBMIT_SELECTOR: &str = r#"button[type="submit"], input[type="submit"], button[class*="submit"], button[class*="send"]"#;
pub const CTA_LINK_SELECTOR: &str = r#"a[class*="btn"], a[class*="button"], a[class*="cta"], a[href*="contact"], a[href*="devis"]"#;

/// Sentinel values typed into detected fields.
pub const SENTINEL_EMAIL: &str = "test@funnelwatch.invalid";
pub const SENTINEL_NAME: &str = "Funnelwatch Probe";
pub const SENTINEL_MESSAGE: &str = "Automated funnel check, please ignore";

/// The scripts a probe may run against a loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageScript {
    /// Start recording uncaught page errors.
    InstallErrorCapture,
    /// Errors recorded since `InstallErrorCapture`.
    PageErrors,
    NavigationTiming,
    FormScan,
    /// Fill detected fields with sentinels; form submission is blocked first.
    FillInputs,
    CtaScan,
    Tracking,
    /// Up to `limit` distinct absolute http(s) link targets.
    CollectLinks { limit: usize },
    ImageScan,
    ViewportMeta,
}

impl PageScript {
    pub fn name(&self) -> &'static str {
        match self {
            PageScript::InstallErrorCapture => "install-error-capture",
            PageScript::PageErrors => "page-errors",
            PageScript::NavigationTiming => "navigation-timing",
            PageScript::FormScan => "form-scan",
            PageScript::FillInputs => "fill-inputs",
            PageScript::CtaScan => "cta-scan",
            PageScript::Tracking => "tracking",
            PageScript::CollectLinks { .. } => "collect-links",
            PageScript::ImageScan => "image-scan",
            PageScript::ViewportMeta => "viewport-meta",
        }
    }

    pub fn source(&self) -> String {
        match self {
            PageScript::InstallErrorCapture => INSTALL_ERROR_CAPTURE_JS.to_string(),
            PageScript::PageErrors => PAGE_ERRORS_JS.to_string(),
            PageScript::NavigationTiming => NAVIGATION_TIMING_JS.to_string(),
            PageScript::FormScan => FORM_SCAN_JS
                .replace("__EMAIL__", &js_string(EMAIL_SELECTOR))
                .replace("__NAME__", &js_string(NAME_SELECTOR))
                .replace("__SUBMIT__", &js_string(SUBMIT_SELECTOR)),
            PageScript::FillInputs => FILL_INPUTS_JS
                .replace("__EMAIL__", &js_string(EMAIL_SELECTOR))
                .replace("__NAME__", &js_string(NAME_SELECTOR))
                .replace("__EMAIL_VALUE__", &js_string(SENTINEL_EMAIL))
                .replace("__NAME_VALUE__", &js_string(SENTINEL_NAME))
                .replace("__MESSAGE_VALUE__", &js_string(SENTINEL_MESSAGE)),
            PageScript::CtaScan => CTA_SCAN_JS
                .replace("__KEYWORDS__", &json_literal(CTA_KEYWORDS))
                .replace("__CTA_LINKS__", &js_string(CTA_LINK_SELECTOR)),
            PageScript::Tracking => TRACKING_JS.replace("__TABLE__", &json_literal(TRACKERS)),
            PageScript::CollectLinks { limit } => {
                COLLECT_LINKS_JS.replace("__LIMIT__", &limit.to_string())
            }
            PageScript::ImageScan => IMAGE_SCAN_JS.to_string(),
            PageScript::ViewportMeta => VIEWPORT_META_JS.to_string(),
        }
    }
}

fn js_string(s: &str) -> String {
    json_literal(&s)
}

fn json_literal<T: Serialize + ?Sized>(value: &T) -> String {
    // Serializing static tables of strings cannot fail.
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Polled by the WebDriver session while waiting for a navigation to settle.
pub const READINESS_JS: &str = r#"
const nav = performance.getEntriesByType('navigation')[0];
return {
  href: String(location.href),
  readyState: document.readyState,
  resources: performance.getEntriesByType('resource').length,
  status: nav && typeof nav.responseStatus === 'number' ? nav.responseStatus : 0
};
"#;

const INSTALL_ERROR_CAPTURE_JS: &str = r#"
if (!window.__funnelwatchErrors) {
  window.__funnelwatchErrors = [];
  window.addEventListener('error', function (e) {
    var where = e.filename ? ' at ' + e.filename + ':' + e.lineno : '';
    window.__funnelwatchErrors.push(String(e.message || e.type) + where);
  });
  window.addEventListener('unhandledrejection', function (e) {
    window.__funnelwatchErrors.push('Unhandled promise rejection: ' + String(e.reason));
  });
}
return true;
"#;

const PAGE_ERRORS_JS: &str = r#"
return (window.__funnelwatchErrors || []).slice(0, 50);
"#;

const NAVIGATION_TIMING_JS: &str = r#"
const perf = window.performance;
const paint = function (name) {
  const entry = perf.getEntriesByName(name)[0];
  return entry ? Math.round(entry.startTime) : null;
};
const nav = perf.getEntriesByType('navigation')[0];
if (!nav) {
  return {
    domContentLoaded: null,
    loadComplete: null,
    firstPaint: paint('first-paint'),
    firstContentfulPaint: paint('first-contentful-paint')
  };
}
return {
  domContentLoaded: Math.round(nav.domContentLoadedEventEnd - nav.domContentLoadedEventStart),
  loadComplete: Math.round(nav.loadEventEnd - nav.loadEventStart),
  firstPaint: paint('first-paint'),
  firstContentfulPaint: paint('first-contentful-paint'),
  transferSize: nav.transferSize || 0
};
"#;

const FORM_SCAN_JS: &str = r#"
const count = function (sel) { return document.querySelectorAll(sel).length; };
const contactBlocks = Array.from(document.querySelectorAll('form, section, div')).filter(function (el) {
  const cls = (typeof el.className === 'string' ? el.className : '').toLowerCase();
  const id = (el.id || '').toLowerCase();
  return (cls.indexOf('contact') >= 0 || id.indexOf('contact') >= 0) && el.querySelector('input, textarea');
}).length;
return {
  forms: count('form'),
  emailInputs: count(__EMAIL__),
  textInputs: count(__NAME__),
  textareas: count('textarea'),
  submitButtons: count(__SUBMIT__),
  contactBlocks: contactBlocks
};
"#;

const FILL_INPUTS_JS: &str = r#"
if (!window.__funnelwatchSubmitGuard) {
  window.__funnelwatchSubmitGuard = true;
  document.addEventListener('submit', function (e) {
    e.preventDefault();
    e.stopImmediatePropagation();
  }, true);
  HTMLFormElement.prototype.submit = function () {};
  HTMLFormElement.prototype.requestSubmit = function () {};
}
const filled = [];
const fire = function (el) {
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
};
document.querySelectorAll(__EMAIL__).forEach(function (el, i) {
  el.value = __EMAIL_VALUE__;
  fire(el);
  filled.push('email field ' + (i + 1));
});
document.querySelectorAll(__NAME__).forEach(function (el, i) {
  if (!el.value) {
    el.value = __NAME_VALUE__;
    fire(el);
    filled.push('name field ' + (i + 1));
  }
});
document.querySelectorAll('textarea').forEach(function (el, i) {
  el.value = __MESSAGE_VALUE__;
  fire(el);
  filled.push('message field ' + (i + 1));
});
return { filled: filled, submitBlocked: window.__funnelwatchSubmitGuard === true };
"#;

const CTA_SCAN_JS: &str = r#"
const keywords = __KEYWORDS__;
const buttons = document.querySelectorAll('button, input[type="button"], input[type="submit"]').length;
const ctaLinks = document.querySelectorAll(__CTA_LINKS__).length;
const textCtas = Array.from(document.querySelectorAll('a, button')).filter(function (el) {
  const text = (el.textContent || '').toLowerCase();
  return keywords.some(function (k) { return text.indexOf(k) >= 0; });
}).length;
const sample = Array.from(document.querySelectorAll('button, a[class*="btn"], a[class*="button"], [class*="cta"]')).slice(0, 3);
const clickable = sample.filter(function (el) {
  return !el.disabled && el.getAttribute('aria-disabled') !== 'true';
}).length;
return {
  buttons: buttons,
  ctaLinks: ctaLinks,
  textCtas: textCtas,
  sampled: sample.length,
  clickable: clickable
};
"#;

const TRACKING_JS: &str = r#"
const table = __TABLE__;
return table.filter(function (probe) {
  return probe.globals.some(function (name) {
    const value = window[name];
    return typeof value !== 'undefined' && (!probe.requireArray || Array.isArray(value));
  });
}).map(function (probe) { return probe.label; });
"#;

const COLLECT_LINKS_JS: &str = r#"
const limit = __LIMIT__;
const seen = new Set();
const out = [];
const anchors = document.querySelectorAll('a[href]');
for (let i = 0; i < anchors.length && out.length < limit; i++) {
  const href = anchors[i].href;
  if (!href || !/^https?:/i.test(href)) continue;
  const clean = href.split('#')[0];
  if (seen.has(clean)) continue;
  seen.add(clean);
  out.push(clean);
}
return out;
"#;

const IMAGE_SCAN_JS: &str = r#"
const images = Array.from(document.images);
const broken = images.filter(function (img) {
  return img.complete && img.naturalWidth === 0 && (img.currentSrc || img.src);
}).map(function (img) { return img.currentSrc || img.src; });
return { total: images.length, broken: broken };
"#;

const VIEWPORT_META_JS: &str = r#"
const meta = document.querySelector('meta[name="viewport"]');
return { present: !!meta, content: meta ? meta.getAttribute('content') : null };
"#;
