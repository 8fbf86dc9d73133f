//! Server-rendered HTML pages.
//!
//! Pages are assembled by string building, mirroring the hosted viewer: a
//! shared stylesheet, a header, and per-page bodies. All dynamic text goes
//! through `html_escape`; anchors and CSS classes come from the timeline and
//! accuracy modules so the markup stays in lockstep with the aggregation
//! core.

use std::collections::HashMap;

use chrono::{FixedOffset, TimeZone};

use crate::accuracy::ScoreSummary;
use crate::aggregate::{self, RunDetail};
use crate::catalog::JokerCatalog;
use crate::db::{Run, RunListItem, SeedStats, StrategyStats};
use crate::lineage::StrategyLineage;

fn esc(s: &str) -> String {
    html_escape::encode_text(s).to_string()
}

/// Display timezone for all page timestamps (UTC+8, as the capture rig).
fn display_tz() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

fn format_ts(ms: Option<i64>) -> String {
    let Some(ms) = ms else { return String::new() };
    match display_tz().timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%m/%d %H:%M").to_string(),
        None => String::new(),
    }
}

const BASE_CSS: &str = r#"
:root{--bg:#1a1a2e;--surface:#16213e;--card:#0f3460;--accent:#e94560;--gold:#f5c518;--text:#eee;--muted:#aaa;--win:#4ade80;--loss:#f87171}
*{margin:0;padding:0;box-sizing:border-box}
body{font-family:'Segoe UI',system-ui,sans-serif;background:var(--bg);color:var(--text);min-height:100vh}
a{color:var(--gold);text-decoration:none}a:hover{text-decoration:underline}
.container{max-width:1400px;margin:0 auto;padding:1rem}
header{background:var(--surface);padding:1rem 0;border-bottom:2px solid var(--accent);margin-bottom:1.5rem}
header .container{display:flex;align-items:center;justify-content:space-between}
header h1{font-size:1.5rem}header h1 span{color:var(--accent)}
.run-table{width:100%;border-collapse:collapse}
.run-table th{text-align:left;padding:.5rem .75rem;color:var(--muted);font-size:.8rem;text-transform:uppercase;border-bottom:1px solid #333}
.run-table td{padding:.6rem .75rem;border-bottom:1px solid #222}
.run-table tbody tr:hover{background:var(--surface);cursor:pointer}
.run-code{color:var(--gold);font-family:monospace;font-weight:bold}
.badge{display:inline-block;padding:.15rem .5rem;border-radius:4px;font-size:.75rem;font-weight:600}
.badge.win{background:#166534;color:var(--win)}.badge.loss{background:#7f1d1d;color:var(--loss)}
.badge.running{background:#1e3a5f;color:#60a5fa;animation:pulse 2s infinite}
@keyframes pulse{0%,100%{opacity:1}50%{opacity:.5}}
.back-btn{display:inline-block;margin-bottom:1rem;padding:.4rem .8rem;background:var(--surface);border:1px solid #333;border-radius:6px;color:var(--text);font-size:.85rem}
.detail-header{background:var(--surface);padding:1.25rem;border-radius:12px;margin-bottom:1.5rem}
.detail-header h2{margin-bottom:.5rem;font-size:1.4rem}
.detail-stats{display:flex;gap:1rem;flex-wrap:wrap;margin-top:.75rem}
.detail-stats .stat{background:var(--card);padding:.5rem .75rem;border-radius:8px;text-align:center;min-width:80px}
.detail-stats .stat .val{font-size:1.2rem;font-weight:bold;color:var(--gold)}
.detail-stats .stat .lbl{font-size:.7rem;color:var(--muted)}
.joker-grid{display:flex;gap:1.25rem;flex-wrap:wrap;margin-bottom:1.5rem}
.joker-card{display:flex;gap:1rem;background:var(--surface);padding:1rem;border-radius:12px;min-width:320px;max-width:480px;flex:1}
.joker-card img{width:96px;height:96px;object-fit:contain;flex-shrink:0}
.joker-card .joker-info{flex:1}
.joker-card .name-en{font-size:1.1rem;font-weight:600}.joker-card .name-zh{font-size:1rem;color:var(--gold);margin-top:3px}
.joker-card .effect{font-size:.9rem;color:var(--muted);margin-top:6px;line-height:1.4}
.feed{display:flex;flex-direction:column;gap:1.5rem}
.feed-entry{background:var(--surface);border-radius:12px;overflow:hidden}
.feed-entry .caption{padding:.75rem 1.25rem;color:#fff;font-size:1.25rem;line-height:1.6;font-weight:500}
.feed-entry .caption .source-tag{font-size:.85rem;padding:.2rem .5rem;border-radius:4px;font-weight:600;margin-left:.5rem;vertical-align:middle}
.feed-entry .caption .source-tag.rule{background:#1e3a5f;color:#60a5fa}
.feed-entry .caption .source-tag.llm{background:#3b1f5e;color:#c084fc}
.feed-entry img.screenshot{width:100%;display:block}
.score-bar{display:flex;align-items:center;gap:.75rem;padding:.4rem 1.25rem .6rem;font-size:1rem;font-family:monospace}
.score-est{color:var(--muted)}.score-arrow{color:#555}.score-act{color:var(--text);font-weight:600}
.score-err{padding:.15rem .4rem;border-radius:4px;font-size:.85rem;font-weight:600}
.score-err.good{background:#166534;color:var(--win)}.score-err.ok{background:#854d0e;color:#fbbf24}.score-err.bad{background:#7f1d1d;color:var(--loss)}
.section{margin-bottom:1.5rem}.section h3{margin-bottom:.75rem;font-size:1.1rem}
.blind-divider{padding:.75rem 1rem;font-size:1.1rem;font-weight:700;color:var(--gold);border-bottom:1px solid #333}
.detail-layout{display:flex;gap:1.5rem;align-items:flex-start}
.detail-main{flex:1;min-width:0}
.toc{position:sticky;top:1rem;width:200px;flex-shrink:0;background:var(--surface);border-radius:12px;padding:.75rem;max-height:calc(100vh - 2rem);overflow-y:auto}
.toc-title{font-size:.85rem;font-weight:600;color:var(--muted);text-transform:uppercase;margin-bottom:.5rem;padding-bottom:.5rem;border-bottom:1px solid #333}
.toc-ante{font-size:.95rem;font-weight:700;color:var(--gold);padding:.5rem .5rem;margin-top:.75rem;cursor:pointer;border-radius:4px;transition:background .15s}
.toc-ante:first-child{margin-top:0}
.toc-ante:hover{background:var(--card)}
.toc-blind{font-size:.85rem;color:var(--muted);padding:.3rem .5rem .3rem 1.25rem;cursor:pointer;border-radius:4px;transition:all .15s}
.toc-blind:hover{color:var(--text);background:rgba(255,255,255,.05)}
.toc-ante.active,.toc-blind.active{color:#fff;background:var(--card);font-weight:700}
.toc-blind.active::before{content:'\25b8 ';color:var(--gold)}
@media(max-width:768px){.detail-layout{flex-direction:column}.toc{display:none}}
.lightbox{display:none;position:fixed;top:0;left:0;width:100%;height:100%;background:rgba(0,0,0,.92);z-index:100;justify-content:center;align-items:center}
.lightbox.active{display:flex}.lightbox img{max-width:95%;max-height:95%;object-fit:contain}
.lightbox .close{position:absolute;top:1rem;right:1.5rem;font-size:2rem;color:#fff;cursor:pointer}
"#;

fn header_html() -> &'static str {
    r#"<header><div class="container"><h1><a href="/" style="color:inherit;text-decoration:none">🃏 <span>Anteroom</span> 运行档案</a></h1></div></header>"#
}

fn lightbox_html() -> &'static str {
    r#"<div class="lightbox" id="lb" onclick="this.classList.remove('active')"><span class="close">&times;</span><img id="lbi" src="" alt=""></div>
<script>function openLb(src){document.getElementById('lbi').src=src;document.getElementById('lb').classList.add('active')}
document.addEventListener('keydown',function(e){if(e.key==='Escape')document.getElementById('lb').classList.remove('active')})</script>"#
}

fn page_head(title: &str, extra_css: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"zh\"><head><meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\n\
         <title>{}</title><style>{}{}</style></head><body>",
        esc(title),
        BASE_CSS,
        extra_css
    )
}

fn progress_badge(run: &Run) -> String {
    if run.status.is_running() {
        "<span class=\"badge running\">运行中</span>".to_string()
    } else if run.won {
        "<span class=\"badge win\">通关</span>".to_string()
    } else {
        let p = match &run.progress {
            Some(p) if !p.is_empty() => esc(p),
            _ => format!("Ante {}", run.final_ante),
        };
        format!("<span class=\"badge loss\">{}</span>", p)
    }
}

fn stat_cell(value: &str, label: &str) -> String {
    format!(
        "<div class=\"stat\"><div class=\"val\">{}</div><div class=\"lbl\">{}</div></div>",
        value, label
    )
}

fn score_err_cell(summary: Option<&ScoreSummary>) -> String {
    match summary {
        Some(s) => format!(
            "<span class=\"score-err {}\">均{:.0}% 峰{:.0}% ({}手)</span>",
            s.grade().as_str(),
            s.avg_abs * 100.0,
            s.max_abs * 100.0,
            s.count
        ),
        None => "-".to_string(),
    }
}

fn strategy_cell(strategy_id: Option<i64>, strategy_name: Option<&str>) -> String {
    match strategy_id {
        Some(sid) => format!(
            "<a href=\"/strategy/{}\" onclick=\"event.stopPropagation()\" style=\"color:var(--gold);font-size:.8rem\">{}</a>",
            sid,
            esc(strategy_name.unwrap_or("-"))
        ),
        None => "-".to_string(),
    }
}

// ============================================================================
// Run list (tabs: runs / strategies / seeds)
// ============================================================================

pub fn run_list_page(
    runs: &[RunListItem],
    summaries: &HashMap<i64, ScoreSummary>,
    strategies: &[StrategyStats],
    seeds: &[SeedStats],
) -> String {
    let mut h = page_head(
        "Anteroom 运行档案",
        r#"
.tabs{display:flex;gap:0;margin-bottom:1.5rem;border-bottom:2px solid #333}
.tab{padding:.6rem 1.5rem;cursor:pointer;font-size:1rem;font-weight:600;color:var(--muted);border-bottom:2px solid transparent;margin-bottom:-2px;transition:all .15s}
.tab:hover{color:var(--text)}
.tab.active{color:var(--gold);border-bottom-color:var(--gold)}
.tab-content{display:none}.tab-content.active{display:block}
"#,
    );
    h.push_str(header_html());
    h.push_str("<div class=\"container\">\n<div class=\"tabs\">");
    h.push_str(&format!(
        "<div class=\"tab active\" onclick=\"switchTab('games')\">🎮 运行 ({})</div>",
        runs.len()
    ));
    h.push_str(&format!(
        "<div class=\"tab\" onclick=\"switchTab('strategies')\">🧠 策略 ({})</div>",
        strategies.len()
    ));
    h.push_str(&format!(
        "<div class=\"tab\" onclick=\"switchTab('seeds')\">🌱 种子 ({})</div>",
        seeds.len()
    ));
    h.push_str("</div>\n<div id=\"tab-games\" class=\"tab-content active\">");
    h.push_str("<table class=\"run-table\"><thead><tr><th>编号</th><th>进度</th><th>策略</th><th>种子</th><th>出牌</th><th>弃牌</th><th>Rule率</th><th>估分误差</th><th>耗时</th><th>成本</th><th>时间</th></tr></thead><tbody>");

    for item in runs {
        let run = &item.run;
        let mut seed = run.seed.clone().unwrap_or_else(|| "-".to_string());
        if seed.chars().count() > 8 {
            seed = seed.chars().take(8).collect();
        }
        let ratio = aggregate::decision_ratio(run.rule_decisions, run.llm_decisions)
            .unwrap_or_else(|| "-".to_string());
        let dur = aggregate::duration_minutes(run.duration_seconds)
            .map(|m| format!("{}m", m))
            .unwrap_or_else(|| "-".to_string());
        let cost = aggregate::cost_label(run.llm_cost_usd).unwrap_or_else(|| "-".to_string());

        h.push_str(&format!(
            "<tr onclick=\"location.href='/game/{rc}'\" style=\"cursor:pointer\">\
             <td class=\"run-code\">{rc}</td><td>{progress}</td><td>{strategy}</td>\
             <td style=\"font-family:monospace;font-size:.8rem;color:var(--muted)\">{seed}</td>\
             <td>{hands}</td><td>{discards}</td><td>{ratio}</td><td>{err}</td>\
             <td>{dur}</td><td>{cost}</td><td>{time}</td></tr>",
            rc = esc(&run.run_code),
            progress = progress_badge(run),
            strategy = strategy_cell(run.strategy_id, item.strategy_name.as_deref()),
            seed = esc(&seed),
            hands = run.hands_played,
            discards = run.discards_used,
            ratio = ratio,
            err = score_err_cell(summaries.get(&run.id)),
            dur = dur,
            cost = cost,
            time = format_ts(run.played_at),
        ));
    }
    h.push_str("</tbody></table></div>");

    // Strategies tab
    h.push_str("<div id=\"tab-strategies\" class=\"tab-content\">");
    h.push_str("<table class=\"run-table\"><thead><tr><th>策略名</th><th>模型</th><th>哈希</th><th>局数</th><th>胜率</th><th>平均Ante</th><th>演进自</th><th>创建时间</th></tr></thead><tbody>");
    for st in strategies {
        let s = &st.strategy;
        let name = s.name.clone().unwrap_or_else(|| "未命名".to_string());
        let model = s
            .model
            .as_deref()
            .unwrap_or("-")
            .rsplit('/')
            .next()
            .unwrap_or("-");
        let chash: String = s.code_hash.as_deref().unwrap_or("-").chars().take(8).collect();
        let wr = if st.run_count > 0 {
            format!("{}%", (st.wins as f64 / st.run_count as f64 * 100.0).round() as i64)
        } else {
            "-".to_string()
        };
        let aa = st
            .avg_ante
            .map(|a| format!("{:.1}", a))
            .unwrap_or_else(|| "-".to_string());
        let parent = match s.parent_id {
            Some(pid) => format!(
                "<a href=\"/strategy/{}\" style=\"color:var(--muted);font-size:.8rem\">&larr; 父策略</a>",
                pid
            ),
            None => String::new(),
        };
        h.push_str(&format!(
            "<tr onclick=\"location.href='/strategy/{id}'\" style=\"cursor:pointer\">\
             <td class=\"run-code\">{name}</td><td>{model}</td>\
             <td style=\"font-family:monospace;font-size:.8rem;color:var(--muted)\">{chash}</td>\
             <td>{count}</td><td>{wr}</td><td>{aa}</td><td>{parent}</td><td>{time}</td></tr>",
            id = s.id,
            name = esc(&name),
            model = esc(model),
            chash = esc(&chash),
            count = st.run_count,
            wr = wr,
            aa = aa,
            parent = parent,
            time = format_ts(Some(s.created_at)),
        ));
    }
    h.push_str("</tbody></table></div>");

    // Seeds tab
    h.push_str("<div id=\"tab-seeds\" class=\"tab-content\">");
    h.push_str("<table class=\"run-table\"><thead><tr><th>种子</th><th>运行次数</th><th>策略数</th><th>最佳Ante</th><th>平均Ante</th><th>胜率</th><th>首次使用</th></tr></thead><tbody>");
    for sd in seeds {
        let wr = if sd.run_count > 0 {
            format!("{}%", (sd.wins as f64 / sd.run_count as f64 * 100.0).round() as i64)
        } else {
            "-".to_string()
        };
        let ba = sd
            .best_ante
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        let aa = sd
            .avg_ante
            .map(|a| format!("{:.1}", a))
            .unwrap_or_else(|| "-".to_string());
        h.push_str(&format!(
            "<tr onclick=\"location.href='/seed/{seed}'\" style=\"cursor:pointer\">\
             <td class=\"run-code\" style=\"font-family:monospace\">{seed}</td>\
             <td>{count}</td><td>{sc}</td><td>{ba}</td><td>{aa}</td><td>{wr}</td><td>{fp}</td></tr>",
            seed = esc(&sd.seed),
            count = sd.run_count,
            sc = sd.strategy_count,
            ba = ba,
            aa = aa,
            wr = wr,
            fp = format_ts(sd.first_played),
        ));
    }
    h.push_str("</tbody></table></div>");

    h.push_str(
        r#"<script>
var tabs=['games','strategies','seeds'];
function switchTab(name){
  document.querySelectorAll('.tab').forEach(function(t,i){t.classList.toggle('active',tabs[i]===name)});
  tabs.forEach(function(n){document.getElementById('tab-'+n).classList.toggle('active',n===name)});
}
</script>
</div></body></html>"#,
    );
    h
}

// ============================================================================
// Run detail
// ============================================================================

pub fn run_detail_page(detail: &RunDetail, catalog: &JokerCatalog) -> String {
    let run = &detail.run;
    let rc = &run.run_code;
    let is_running = run.status.is_running();

    let dur = aggregate::duration_minutes(run.duration_seconds)
        .map(|m| format!("{}分钟", m))
        .unwrap_or_else(|| "-".to_string());
    let cost = aggregate::cost_label(run.llm_cost_usd).unwrap_or_else(|| "-".to_string());
    let ratio = aggregate::decision_ratio(run.rule_decisions, run.llm_decisions)
        .unwrap_or_else(|| "-".to_string());
    let icon = if is_running {
        "🔄"
    } else if run.won {
        "🏆"
    } else {
        "💀"
    };
    let status_badge = if is_running {
        " <span class=\"badge running\">运行中</span>"
    } else {
        ""
    };

    let mut h = page_head(&format!("{} - Anteroom", rc), "");
    h.push_str(header_html());
    h.push_str("<div class=\"container\">\n<a class=\"back-btn\" href=\"/\">&larr; 返回列表</a>");

    let strategy_link = match &detail.strategy {
        Some(s) => format!(
            "<a href=\"/strategy/{}\" style=\"color:var(--gold)\">{}</a>",
            s.id,
            esc(s.name.as_deref().unwrap_or("未命名"))
        ),
        None => "未知".to_string(),
    };
    h.push_str(&format!(
        "<div class=\"detail-header\"><h2>{icon} {rc}{badge}</h2>\
         <div style=\"font-family:monospace;font-size:.9rem;color:var(--muted);margin:.5rem 0\">种子: {seed} | 策略: {strategy}</div>\
         <div class=\"detail-stats\">",
        icon = icon,
        rc = esc(rc),
        badge = status_badge,
        seed = esc(run.seed.as_deref().unwrap_or("未知")),
        strategy = strategy_link,
    ));
    for (v, l) in [
        (format!("Ante {}", run.final_ante), "关卡"),
        (run.hands_played.to_string(), "出牌"),
        (run.discards_used.to_string(), "弃牌"),
        (run.purchases.to_string(), "购买"),
        (ratio, "Rule率"),
        (dur, "耗时"),
        (cost, "LLM成本"),
    ] {
        h.push_str(&stat_cell(&v, l));
    }
    h.push_str("</div></div>");

    // Jokers, resolved against the catalog; misses render without art
    if !detail.jokers.is_empty() {
        h.push_str(&format!(
            "<div class=\"section\"><h3>🃏 小丑牌 ({})</h3><div class=\"joker-grid\">",
            detail.jokers.len()
        ));
        for j in &detail.jokers {
            let info = catalog.lookup(&j.name);
            h.push_str("<div class=\"joker-card\">");
            if let Some(img) = info.and_then(|i| i.image.as_deref()) {
                h.push_str(&format!(
                    "<img src=\"/joker-images/{}\" alt=\"{}\">",
                    img,
                    esc(&j.name)
                ));
            }
            h.push_str(&format!(
                "<div class=\"joker-info\"><div class=\"name-en\">{}</div>",
                esc(&j.name)
            ));
            if let Some(zh) = info.and_then(|i| i.name_zh.as_deref()) {
                h.push_str(&format!("<div class=\"name-zh\">{}</div>", esc(zh)));
            }
            let effect = info.and_then(|i| i.effect_zh.as_deref().or(i.effect_en.as_deref()));
            if let Some(effect) = effect {
                h.push_str(&format!("<div class=\"effect\">{}</div>", esc(effect)));
            }
            h.push_str("</div></div>");
        }
        h.push_str("</div></div>");
    }

    // Feed with TOC sidebar
    h.push_str("<div class=\"detail-layout\"><div class=\"detail-main\">");
    h.push_str(&format!(
        "<div class=\"section\"><h3>📷 游戏过程 ({} 张)",
        detail.screenshots.len()
    ));
    if is_running {
        h.push_str(" <span class=\"badge running\">实时更新中</span>");
    }
    h.push_str("</h3><div class=\"feed\">");

    for (shot, entry) in detail.screenshots.iter().zip(detail.timeline.entries.iter()) {
        if let Some(divider) = &entry.divider {
            h.push_str(&format!(
                "<div class=\"blind-divider\" id=\"{}\">{}</div>",
                divider.anchor,
                esc(&divider.label())
            ));
        }

        let caption = shot
            .caption
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(shot.event_type.as_deref())
            .unwrap_or("");
        h.push_str("<div class=\"feed-entry\">");
        if !caption.is_empty() {
            let src_tag = match entry.source {
                Some(src) => format!(
                    " <span class=\"source-tag {}\">{}</span>",
                    src.as_str(),
                    src.tag_label()
                ),
                None => String::new(),
            };
            h.push_str(&format!(
                "<div class=\"caption\">{}{}</div>",
                esc(caption),
                src_tag
            ));
        }

        if let Some(score) = &entry.score {
            let err_pct = (score.error * 100.0).round() as i64;
            let sign = if score.error >= 0.0 { "+" } else { "" };
            h.push_str(&format!(
                "<div class=\"score-bar\"><span class=\"score-est\">估分 {}</span>\
                 <span class=\"score-arrow\">&rarr;</span><span class=\"score-act\">实际 {}</span>\
                 <span class=\"score-err {}\">{}{}%</span></div>",
                score.estimated,
                score.actual,
                score.grade.as_str(),
                sign,
                err_pct
            ));
        }

        h.push_str(&format!(
            "<img class=\"screenshot\" src=\"/screenshots/{}\" alt=\"\" onclick=\"openLb(this.src)\" loading=\"lazy\" onerror=\"this.style.display='none'\">",
            esc(&shot.filename)
        ));
        h.push_str("</div>");
    }
    h.push_str("</div></div></div>");

    // TOC sidebar, grouped by ante
    h.push_str("<div class=\"toc\"><div class=\"toc-title\">目录</div>");
    let mut last_toc_ante = 0u32;
    for entry in &detail.timeline.toc {
        if entry.ante > 0 && entry.ante != last_toc_ante {
            last_toc_ante = entry.ante;
            h.push_str(&format!(
                "<div class=\"toc-ante\" data-target=\"{a}\" onclick=\"document.getElementById('{a}').scrollIntoView({{behavior:'smooth'}})\">第{n}关</div>",
                a = entry.anchor,
                n = entry.ante
            ));
        }
        h.push_str(&format!(
            "<div class=\"toc-blind\" data-target=\"{a}\" onclick=\"document.getElementById('{a}').scrollIntoView({{behavior:'smooth'}})\">{label}</div>",
            a = entry.anchor,
            label = esc(entry.stage.label())
        ));
    }
    h.push_str("</div></div>");

    // Running games re-poll; no push channel by design
    if is_running {
        h.push_str("<script>setTimeout(function(){location.reload()},5000)</script>");
    }

    h.push_str(
        r#"<script>
(function(){
  var dividers=document.querySelectorAll('.blind-divider[id]');
  var tocEls=document.querySelectorAll('.toc-ante,.toc-blind');
  if(!dividers.length||!tocEls.length)return;
  var obs=new IntersectionObserver(function(entries){
    entries.forEach(function(e){
      if(e.isIntersecting){
        var id=e.target.id;
        tocEls.forEach(function(t){
          var match=t.getAttribute('data-target')===id;
          t.classList.toggle('active',match);
          if(match)t.scrollIntoView({block:'nearest',behavior:'smooth'});
        });
      }
    });
  },{rootMargin:'-10% 0px -80% 0px'});
  dividers.forEach(function(d){obs.observe(d)});
})();
</script>"#,
    );

    h.push_str("</div>");
    h.push_str(lightbox_html());
    h.push_str("</body></html>");
    h
}

// ============================================================================
// Strategy detail
// ============================================================================

pub fn strategy_page(lineage: &StrategyLineage, runs: &[Run]) -> String {
    let s = &lineage.current;
    let name = s.name.clone().unwrap_or_else(|| "未命名".to_string());
    let total = runs.len();
    let wins = runs.iter().filter(|r| r.won).count();
    let win_rate = if total > 0 {
        format!("{}%", (wins as f64 / total as f64 * 100.0).round() as i64)
    } else {
        "-".to_string()
    };
    let avg_ante = if total > 0 {
        let sum: i64 = runs.iter().map(|r| r.final_ante).sum();
        format!("{:.1}", sum as f64 / total as f64)
    } else {
        "-".to_string()
    };

    let mut h = page_head(
        &format!("策略 {} - Anteroom", name),
        r#"
pre.code{background:#0d1117;padding:1rem;border-radius:8px;overflow-x:auto;font-size:.8rem;line-height:1.5;max-height:600px;overflow-y:auto;border:1px solid #333}
.tree{display:flex;align-items:center;gap:.5rem;flex-wrap:wrap;margin:.75rem 0}
.tree-node{padding:.3rem .6rem;border-radius:6px;font-size:.85rem;font-family:monospace}
.tree-node.current{background:var(--accent);color:#fff;font-weight:700}
.tree-node.ancestor{background:var(--surface);color:var(--muted)}
.tree-node.child{background:var(--card);color:var(--gold)}
.tree-arrow{color:var(--muted);font-size:.8rem}
"#,
    );
    h.push_str(header_html());
    h.push_str("<div class=\"container\">\n<a class=\"back-btn\" href=\"/\">&larr; 返回列表</a>");
    h.push_str(&format!(
        "<div class=\"detail-header\">\n<h2>🧠 {}</h2>\n\
         <div style=\"font-family:monospace;font-size:.9rem;color:var(--muted);margin:.5rem 0\">\n哈希: {} | 模型: {}\n</div>",
        esc(&name),
        esc(s.code_hash.as_deref().unwrap_or("-")),
        esc(s.model.as_deref().unwrap_or("-")),
    ));

    // Lineage: ancestors -> current -> children
    if !lineage.ancestors.is_empty() || !lineage.children.is_empty() {
        h.push_str("<div class=\"tree\"><span style=\"color:var(--muted);font-size:.8rem\">演进:</span>");
        for a in &lineage.ancestors {
            let label = a
                .name
                .clone()
                .or_else(|| a.code_hash.as_ref().map(|ch| ch.chars().take(8).collect()))
                .unwrap_or_else(|| a.id.to_string());
            h.push_str(&format!(
                "<a href=\"/strategy/{}\" class=\"tree-node ancestor\">{}<br><span style=\"font-size:.7rem\">{}</span></a><span class=\"tree-arrow\">&rarr;</span>",
                a.id,
                esc(&label),
                format_ts(Some(a.created_at))
            ));
        }
        h.push_str(&format!(
            "<span class=\"tree-node current\">{}<br><span style=\"font-size:.7rem\">{}</span></span>",
            esc(&name),
            format_ts(Some(s.created_at))
        ));
        for c in &lineage.children {
            let label = c
                .name
                .clone()
                .or_else(|| c.code_hash.as_ref().map(|ch| ch.chars().take(8).collect()))
                .unwrap_or_else(|| c.id.to_string());
            h.push_str(&format!(
                "<span class=\"tree-arrow\">&rarr;</span><a href=\"/strategy/{}\" class=\"tree-node child\">{}<br><span style=\"font-size:.7rem\">{}</span></a>",
                c.id,
                esc(&label),
                format_ts(Some(c.created_at))
            ));
        }
        h.push_str("</div>");
    }

    h.push_str("<div class=\"detail-stats\">");
    for (v, l) in [
        (total.to_string(), "总局数"),
        (wins.to_string(), "胜场"),
        (win_rate, "胜率"),
        (avg_ante, "平均Ante"),
    ] {
        h.push_str(&stat_cell(&v, l));
    }
    h.push_str("</div></div>");

    if let Some(summary) = s.summary.as_deref().filter(|t| !t.is_empty()) {
        h.push_str(&format!(
            "<div class=\"section\"><h3>📝 策略摘要</h3><div style=\"background:var(--surface);padding:1rem;border-radius:8px;line-height:1.6\">{}</div></div>",
            esc(summary)
        ));
    }

    if let Some(params) = s.params.as_deref() {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(params) {
            if !map.is_empty() {
                h.push_str("<div class=\"section\"><h3>⚙️ 参数</h3><div style=\"background:var(--surface);padding:1rem;border-radius:8px;font-family:monospace;font-size:.9rem\">");
                for (k, v) in &map {
                    h.push_str(&format!(
                        "<div>{}: <span style=\"color:var(--gold)\">{}</span></div>",
                        esc(k),
                        esc(&v.to_string())
                    ));
                }
                h.push_str("</div></div>");
            }
        }
    }

    if let Some(code) = s.source_code.as_deref().filter(|t| !t.is_empty()) {
        h.push_str(&format!(
            "<div class=\"section\"><h3>💻 策略代码</h3><pre class=\"code\"><code>{}</code></pre></div>",
            esc(code)
        ));
    }

    if !runs.is_empty() {
        h.push_str(&format!("<div class=\"section\"><h3>🎮 关联运行 ({} 局)</h3>", total));
        h.push_str("<table class=\"run-table\"><thead><tr><th>编号</th><th>进度</th><th>种子</th><th>出牌</th><th>弃牌</th><th>耗时</th><th>时间</th></tr></thead><tbody>");
        for r in runs {
            let seed: String = r.seed.as_deref().unwrap_or("-").chars().take(8).collect();
            let dur = aggregate::duration_minutes(r.duration_seconds)
                .map(|m| format!("{}m", m))
                .unwrap_or_else(|| "-".to_string());
            h.push_str(&format!(
                "<tr onclick=\"location.href='/game/{rc}'\" style=\"cursor:pointer\">\
                 <td class=\"run-code\">{rc}</td><td>{progress}</td>\
                 <td style=\"font-family:monospace;font-size:.8rem;color:var(--muted)\">{seed}</td>\
                 <td>{hands}</td><td>{discards}</td><td>{dur}</td><td>{time}</td></tr>",
                rc = esc(&r.run_code),
                progress = progress_badge(r),
                seed = esc(&seed),
                hands = r.hands_played,
                discards = r.discards_used,
                dur = dur,
                time = format_ts(r.played_at),
            ));
        }
        h.push_str("</tbody></table></div>");
    }

    h.push_str("</div></body></html>");
    h
}

// ============================================================================
// Seed detail
// ============================================================================

pub fn seed_page(seed: &str, runs: &[RunListItem]) -> String {
    let total = runs.len();
    let wins = runs.iter().filter(|r| r.run.won).count();
    let best_ante = runs.iter().map(|r| r.run.final_ante).max().unwrap_or(0);
    let mut strategies_used: Vec<String> = runs
        .iter()
        .filter(|r| r.run.strategy_id.is_some())
        .map(|r| r.strategy_name.clone().unwrap_or_else(|| "?".to_string()))
        .collect();
    strategies_used.sort();
    strategies_used.dedup();

    let mut h = page_head(&format!("种子 {} - Anteroom", seed), "");
    h.push_str(header_html());
    h.push_str("<div class=\"container\">\n<a class=\"back-btn\" href=\"/\">&larr; 返回列表</a>");
    h.push_str(&format!(
        "<div class=\"detail-header\">\n<h2>🌱 种子: <span style=\"font-family:monospace\">{}</span></h2>\n<div class=\"detail-stats\">",
        esc(seed)
    ));
    for (v, l) in [
        (total.to_string(), "运行次数"),
        (wins.to_string(), "胜场"),
        (best_ante.to_string(), "最佳Ante"),
        (strategies_used.len().to_string(), "策略数"),
    ] {
        h.push_str(&stat_cell(&v, l));
    }
    h.push_str("</div></div>");

    if !strategies_used.is_empty() {
        h.push_str("<div class=\"section\"><h3>🧠 使用过的策略</h3><div style=\"display:flex;gap:.5rem;flex-wrap:wrap\">");
        for sn in &strategies_used {
            h.push_str(&format!(
                "<span style=\"background:var(--surface);padding:.3rem .6rem;border-radius:6px;font-size:.85rem\">{}</span>",
                esc(sn)
            ));
        }
        h.push_str("</div></div>");
    }

    h.push_str(&format!("<div class=\"section\"><h3>🎮 关联运行 ({} 局)</h3>", total));
    h.push_str("<table class=\"run-table\"><thead><tr><th>编号</th><th>进度</th><th>策略</th><th>出牌</th><th>弃牌</th><th>耗时</th><th>时间</th></tr></thead><tbody>");
    for item in runs {
        let r = &item.run;
        let dur = aggregate::duration_minutes(r.duration_seconds)
            .map(|m| format!("{}m", m))
            .unwrap_or_else(|| "-".to_string());
        h.push_str(&format!(
            "<tr onclick=\"location.href='/game/{rc}'\" style=\"cursor:pointer\">\
             <td class=\"run-code\">{rc}</td><td>{progress}</td><td>{strategy}</td>\
             <td>{hands}</td><td>{discards}</td><td>{dur}</td><td>{time}</td></tr>",
            rc = esc(&r.run_code),
            progress = progress_badge(r),
            strategy = strategy_cell(r.strategy_id, item.strategy_name.as_deref()),
            hands = r.hands_played,
            discards = r.discards_used,
            dur = dur,
            time = format_ts(r.played_at),
        ));
    }
    h.push_str("</tbody></table></div></div></body></html>");
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewRun, NewScreenshot};

    #[test]
    fn test_format_ts() {
        // 2023-11-14T22:13:20Z is 2023-11-15 06:13:20 at UTC+8
        assert_eq!(format_ts(Some(1_700_000_000_000)), "11/15 06:13");
        assert_eq!(format_ts(None), "");
    }

    #[test]
    fn test_detail_page_has_dividers_and_escapes() {
        let db = Database::in_memory().unwrap();
        let new = NewRun {
            run_code: None,
            seed: Some("<SEED>".to_string()),
            deck: "Red Deck".to_string(),
            stake: "White".to_string(),
            final_ante: 3,
            final_score: None,
            won: false,
            endless_ante: None,
            notes: None,
            status: None,
            strategy_id: None,
            llm_model: None,
            played_at: None,
        };
        let run = db.create_run(&new, "G7", 1_700_000_000_000).unwrap();
        db.insert_screenshot(&NewScreenshot {
            run_id: run.id,
            round_id: None,
            filename: format!("{}/a.png", run.id),
            original_name: None,
            caption: Some("第1关 小盲 <script>".to_string()),
            event_type: None,
            file_size: None,
            width: None,
            height: None,
            estimated_score: Some(100),
            actual_score: Some(130),
            score_error: None,
        })
        .unwrap();

        let detail = crate::aggregate::run_detail(&db, run.id).unwrap();
        let html = run_detail_page(&detail, &JokerCatalog::from_entries(Vec::new()));
        assert!(html.contains("id=\"blind-0\""));
        assert!(html.contains("第1关 小盲"));
        assert!(!html.contains("<script>第"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("score-err ok"));
        assert!(html.contains("&lt;SEED&gt;"));
    }
}
