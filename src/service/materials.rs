//! Learning materials. Only the teacher owning a material's class may change it;
//! deletion is soft.

use crate::error::AppError;
use crate::model::material::normalize_tags;
use crate::model::{to_body, Class, Material, MaterialKind, MaterialPatch, NewMaterial, Reorder};
use crate::store::{Collection, Condition, Query, Store, Update};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub struct MaterialService;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MaterialFilter {
    pub kind: Option<MaterialKind>,
}

impl MaterialService {
    /// The class must be active and owned by `teacher_id`. An `order` of 0 appends.
    pub async fn create(store: &dyn Store, input: NewMaterial) -> Result<Material, AppError> {
        let class = active_class(store, input.class_id).await?;
        if class.teacher_id != input.teacher_id {
            return Err(AppError::Forbidden(format!(
                "class {} is not owned by teacher {}",
                class.id, input.teacher_id
            )));
        }
        let order = if input.order == 0 {
            next_order(store, class.id).await?
        } else {
            input.order
        };
        let mut body = to_body(&json!({
            "title": input.title.trim(),
            "description": input.description.map(|d| d.trim().to_string()),
            "content": input.content,
            "class_id": class.id,
            "teacher_id": input.teacher_id,
            "kind": input.kind,
            "file_url": input.file_url,
            "order": order,
            "tags": normalize_tags(&input.tags),
            "active": true,
            "views": 0,
        }))?;
        body.retain(|_, v| !v.is_null());
        let material: Material = store.insert(Collection::Materials, body).await?.decode()?;
        tracing::info!(material_id = %material.id, class_id = %class.id, order, "material created");
        Ok(material)
    }

    /// An active material; each read counts as a view.
    pub async fn get(store: &dyn Store, id: Uuid) -> Result<Material, AppError> {
        let mut material = active_material(store, id).await?;
        store
            .increment(Collection::Materials, &[id], "views", 1)
            .await?;
        material.views += 1;
        Ok(material)
    }

    /// Active materials of a class in display order.
    pub async fn list_by_class(store: &dyn Store, class_id: Uuid, filter: &MaterialFilter) -> Result<Vec<Material>, AppError> {
        let mut query = Query::new()
            .filter(Condition::eq_id("class_id", class_id))
            .filter(Condition::eq("active", true));
        if let Some(kind) = filter.kind {
            query = query.filter(Condition::eq("kind", json!(kind)));
        }
        let mut materials: Vec<Material> = store
            .find(Collection::Materials, &query)
            .await?
            .iter()
            .map(|d| d.decode())
            .collect::<Result<_, _>>()?;
        materials.sort_by(|a, b| a.order.cmp(&b.order).then(a.created_at.cmp(&b.created_at)));
        Ok(materials)
    }

    /// `patch.teacher_id` names the caller and must own the material.
    pub async fn update(store: &dyn Store, id: Uuid, mut patch: MaterialPatch) -> Result<Material, AppError> {
        let caller = patch
            .teacher_id
            .ok_or_else(|| AppError::Validation("teacher_id is required".into()))?;
        let material = active_material(store, id).await?;
        require_owner(&material, caller)?;

        if let Some(title) = patch.title.as_mut() {
            *title = title.trim().to_string();
        }
        if let Some(tags) = patch.tags.as_mut() {
            *tags = normalize_tags(tags);
        }
        let update = Update::new().merge(to_body(&patch)?);
        store
            .update(Collection::Materials, id, &[], &update)
            .await?
            .ok_or_else(|| material_not_found(id))?
            .decode()
    }

    /// Soft delete by the owning teacher.
    pub async fn delete(store: &dyn Store, id: Uuid, teacher_id: Uuid) -> Result<Material, AppError> {
        let material = active_material(store, id).await?;
        require_owner(&material, teacher_id)?;
        let material: Material = store
            .update(Collection::Materials, id, &[], &Update::new().set("active", false))
            .await?
            .ok_or_else(|| material_not_found(id))?
            .decode()?;
        tracing::info!(material_id = %id, "material deactivated");
        Ok(material)
    }

    /// Assign `order = position + 1` to the listed materials of one class.
    pub async fn reorder(store: &dyn Store, input: Reorder) -> Result<Vec<Material>, AppError> {
        if input.material_ids.is_empty() {
            return Err(AppError::Validation("material_ids must not be empty".into()));
        }
        let class: Class = store
            .get(Collection::Classes, input.class_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("class {}", input.class_id)))?
            .decode()?;
        if class.teacher_id != input.teacher_id {
            return Err(AppError::Forbidden(format!(
                "class {} is not owned by teacher {}",
                class.id, input.teacher_id
            )));
        }
        let query = Query::new()
            .filter(Condition::IdIn(input.material_ids.clone()))
            .filter(Condition::eq_id("class_id", class.id));
        let found: Vec<Uuid> = store
            .find(Collection::Materials, &query)
            .await?
            .iter()
            .map(|d| d.id)
            .collect();
        let foreign: Vec<String> = input
            .material_ids
            .iter()
            .filter(|id| !found.contains(id))
            .map(Uuid::to_string)
            .collect();
        if !foreign.is_empty() {
            return Err(AppError::InvalidReference {
                kind: "material",
                ids: foreign,
            });
        }

        for (position, id) in input.material_ids.iter().enumerate() {
            let update = Update::new().set("order", position as u64 + 1);
            store.update(Collection::Materials, *id, &[], &update).await?;
        }
        tracing::info!(class_id = %class.id, materials = input.material_ids.len(), "materials reordered");
        Self::list_by_class(store, class.id, &MaterialFilter::default()).await
    }
}

async fn active_class(store: &dyn Store, id: Uuid) -> Result<Class, AppError> {
    let class: Class = store
        .get(Collection::Classes, id)
        .await?
        .ok_or_else(|| AppError::invalid_classes([id]))?
        .decode()?;
    if !class.active {
        return Err(AppError::invalid_classes([id]));
    }
    Ok(class)
}

async fn active_material(store: &dyn Store, id: Uuid) -> Result<Material, AppError> {
    let material: Material = store
        .get(Collection::Materials, id)
        .await?
        .ok_or_else(|| material_not_found(id))?
        .decode()?;
    if !material.active {
        return Err(material_not_found(id));
    }
    Ok(material)
}

async fn next_order(store: &dyn Store, class_id: Uuid) -> Result<u32, AppError> {
    let docs = store
        .find(Collection::Materials, &Query::new().filter(Condition::eq_id("class_id", class_id)))
        .await?;
    let mut max = 0;
    for doc in &docs {
        max = max.max(doc.decode::<Material>()?.order);
    }
    Ok(max + 1)
}

fn require_owner(material: &Material, teacher_id: Uuid) -> Result<(), AppError> {
    if material.teacher_id == teacher_id {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "material {} is not owned by teacher {}",
            material.id, teacher_id
        )))
    }
}

fn material_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("material {}", id))
}
