use maud::{html, Markup, DOCTYPE};

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";

pub fn desktop_layout(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                link rel="stylesheet" href=(LEAFLET_CSS);
                script src=(LEAFLET_JS) {};
                style {
                    "body { margin: 0; font-family: system-ui, sans-serif; }"
                    "header { padding: 0.75rem 1.5rem; box-shadow: 0 1px 4px rgba(0,0,0,.15); }"
                    "main { display: flex; height: calc(100vh - 3.5rem); }"
                    "#listing-map { flex: 1; }"
                    "aside { width: 22rem; overflow-y: auto; padding: 0 1rem; }"
                    ".price-pin { background: #524ed2; color: #fff; border-radius: 4px; padding: 2px 6px; font-size: 12px; white-space: nowrap; width: auto !important; height: auto !important; }"
                }
            }
            body {
                header {
                    strong { "pinmap" }
                }
                (content)
            }
        }
    }
}
