use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub is_default: bool,
}

/// 初回起動時に投入するデフォルトカテゴリ
pub fn default_categories() -> Vec<Category> {
    [
        ("1", "仕事", "#4285F4"),
        ("2", "プライベート", "#34A853"),
        ("3", "買い物", "#FBBC04"),
        ("4", "勉強", "#EA4335"),
        ("5", "健康", "#34A853"),
        ("6", "その他", "#9E9E9E"),
    ]
    .into_iter()
    .map(|(id, name, color)| Category {
        id: id.to_string(),
        name: name.to_string(),
        color: color.to_string(),
        icon: None,
        is_default: true,
    })
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategoryRequest {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_default: Option<bool>,
}
