use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub stages: StageConfig,
    #[serde(default)]
    pub antenna: AntennaConfig,
}

#[derive(Debug, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_lef_files")]
    pub lef_files: Vec<String>,
    #[serde(default = "default_def_file")]
    pub def_file: String,
    #[serde(default = "default_output_def")]
    pub output_def: String,
    #[serde(default = "default_failed_file")]
    pub failed_file: String,
    #[serde(default)]
    pub vdd_name: Option<String>,
    #[serde(default)]
    pub gnd_name: Option<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            lef_files: default_lef_files(),
            def_file: default_def_file(),
            output_def: default_output_def(),
            failed_file: default_failed_file(),
            vdd_name: None,
            gnd_name: None,
        }
    }
}

/// Cost weights and per-pass budgets for the maze search (C4).
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_num_passes")]
    pub num_passes: usize,
    #[serde(default = "default_max_cost")]
    pub max_cost: u32,
    #[serde(default = "default_seg_cost")]
    pub seg_cost: u32,
    #[serde(default = "default_via_cost")]
    pub via_cost: u32,
    #[serde(default = "default_jog_cost")]
    pub jog_cost: u32,
    #[serde(default = "default_xver_cost")]
    pub xver_cost: u32,
    #[serde(default = "default_offset_cost")]
    pub offset_cost: u32,
    #[serde(default = "default_block_cost")]
    pub block_cost: u32,
    #[serde(default = "default_conflict_cost")]
    pub conflict_cost: u32,
    #[serde(default = "default_stacked_contacts")]
    pub stacked_contacts: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_passes: default_num_passes(),
            max_cost: default_max_cost(),
            seg_cost: default_seg_cost(),
            via_cost: default_via_cost(),
            jog_cost: default_jog_cost(),
            xver_cost: default_xver_cost(),
            offset_cost: default_offset_cost(),
            block_cost: default_block_cost(),
            conflict_cost: default_conflict_cost(),
            stacked_contacts: default_stacked_contacts(),
        }
    }
}

/// Stage-orchestrator (C5) budgets.
#[derive(Debug, Deserialize, Clone)]
pub struct StageConfig {
    #[serde(default = "default_effort")]
    pub effort: usize,
    #[serde(default = "default_rip_limit")]
    pub rip_limit: usize,
    #[serde(default = "default_force_routable")]
    pub force_routable: bool,
    #[serde(default = "default_mask_mode")]
    pub mask_mode: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            effort: default_effort(),
            rip_limit: default_rip_limit(),
            force_routable: default_force_routable(),
            mask_mode: default_mask_mode(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AntennaConfig {
    #[serde(default = "default_antenna_fix")]
    pub fix: bool,
    #[serde(default = "default_antenna_cell_pattern")]
    pub antenna_cell_pattern: String,
}

impl Default for AntennaConfig {
    fn default() -> Self {
        Self {
            fix: default_antenna_fix(),
            antenna_cell_pattern: default_antenna_cell_pattern(),
        }
    }
}

fn default_lef_files() -> Vec<String> {
    vec!["inputs/tech.lef".to_string()]
}
fn default_def_file() -> String {
    "inputs/placed.def".to_string()
}
fn default_output_def() -> String {
    "output/routed.def".to_string()
}
fn default_failed_file() -> String {
    "output/failed.txt".to_string()
}
fn default_num_passes() -> usize {
    10
}
fn default_max_cost() -> u32 {
    10_000_000
}
fn default_seg_cost() -> u32 {
    1
}
fn default_via_cost() -> u32 {
    10
}
fn default_jog_cost() -> u32 {
    5
}
fn default_xver_cost() -> u32 {
    15
}
fn default_offset_cost() -> u32 {
    3
}
fn default_block_cost() -> u32 {
    20
}
fn default_conflict_cost() -> u32 {
    8
}
fn default_stacked_contacts() -> u32 {
    2
}
fn default_effort() -> usize {
    50
}
fn default_rip_limit() -> usize {
    10
}
fn default_force_routable() -> bool {
    false
}
fn default_mask_mode() -> String {
    "auto".to_string()
}
fn default_antenna_fix() -> bool {
    true
}
fn default_antenna_cell_pattern() -> String {
    "ANTENNA*".to_string()
}
