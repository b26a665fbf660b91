//! Flashcard sets. `card_count` always mirrors `cards`.

use super::Page;
use crate::error::AppError;
use crate::model::{to_body, Card, FlashcardPatch, FlashcardSet, NewCard, NewFlashcardSet, Role, User};
use crate::store::{Collection, Condition, Query, Store, Update};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub struct FlashcardService;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FlashcardFilter {
    pub class_id: Option<Uuid>,
    pub teacher_id: Option<Uuid>,
    pub active: Option<bool>,
}

impl FlashcardService {
    /// The teacher must hold the teacher role and the class must exist.
    pub async fn create(store: &dyn Store, input: NewFlashcardSet) -> Result<FlashcardSet, AppError> {
        let teacher: User = store
            .get(Collection::Users, input.teacher_id)
            .await?
            .ok_or_else(|| AppError::invalid_user(input.teacher_id))?
            .decode()?;
        if teacher.role != Role::Teacher {
            return Err(AppError::invalid_user(teacher.id));
        }
        require_class(store, input.class_id).await?;

        let cards = build_cards(input.cards)?;
        let body = to_body(&json!({
            "title": input.title.trim(),
            "topic": input.topic.trim(),
            "description": input.description.trim(),
            "class_id": input.class_id,
            "teacher_id": teacher.id,
            "card_count": cards.len(),
            "cards": cards,
            "active": true,
            "total_views": 0,
        }))?;
        let set: FlashcardSet = store.insert(Collection::Flashcards, body).await?.decode()?;
        tracing::info!(flashcard_id = %set.id, cards = set.card_count, "flashcard set created");
        Ok(set)
    }

    pub async fn list(store: &dyn Store, filter: &FlashcardFilter, page: Page) -> Result<Vec<FlashcardSet>, AppError> {
        let mut query = Query::new();
        if let Some(class_id) = filter.class_id {
            query = query.filter(Condition::eq_id("class_id", class_id));
        }
        if let Some(teacher_id) = filter.teacher_id {
            query = query.filter(Condition::eq_id("teacher_id", teacher_id));
        }
        if let Some(active) = filter.active {
            query = query.filter(Condition::eq("active", active));
        }
        let docs = store.find(Collection::Flashcards, &page.apply(query)).await?;
        docs.iter().map(|d| d.decode()).collect()
    }

    /// Active sets of a class, newest first.
    pub async fn list_by_class(store: &dyn Store, class_id: Uuid) -> Result<Vec<FlashcardSet>, AppError> {
        let query = Query::new()
            .filter(Condition::eq_id("class_id", class_id))
            .filter(Condition::eq("active", true));
        let docs = store.find(Collection::Flashcards, &query).await?;
        docs.iter().map(|d| d.decode()).collect()
    }

    /// Each read counts towards `total_views`.
    pub async fn get(store: &dyn Store, id: Uuid) -> Result<FlashcardSet, AppError> {
        let mut set = Self::find(store, id).await?;
        store
            .increment(Collection::Flashcards, &[id], "total_views", 1)
            .await?;
        set.total_views += 1;
        Ok(set)
    }

    pub async fn update(store: &dyn Store, id: Uuid, patch: FlashcardPatch) -> Result<FlashcardSet, AppError> {
        let mut update = Update::new();
        if let Some(title) = patch.title {
            update = update.set("title", title.trim());
        }
        if let Some(topic) = patch.topic {
            update = update.set("topic", topic.trim());
        }
        if let Some(description) = patch.description {
            update = update.set("description", description.trim());
        }
        if let Some(class_id) = patch.class_id {
            require_class(store, class_id).await?;
            update = update.set("class_id", class_id.to_string());
        }
        if let Some(cards) = patch.cards {
            let cards = build_cards(cards)?;
            update = update
                .set("card_count", cards.len() as u64)
                .set("cards", json!(cards));
        }
        if let Some(active) = patch.active {
            update = update.set("active", active);
        }
        store
            .update(Collection::Flashcards, id, &[], &update)
            .await?
            .ok_or_else(|| flashcard_not_found(id))?
            .decode()
    }

    pub async fn delete(store: &dyn Store, id: Uuid) -> Result<FlashcardSet, AppError> {
        let set: FlashcardSet = store
            .delete(Collection::Flashcards, id, &[])
            .await?
            .ok_or_else(|| flashcard_not_found(id))?
            .decode()?;
        tracing::info!(flashcard_id = %id, "flashcard set deleted");
        Ok(set)
    }

    /// Flip `active`. Guarded on the value read so concurrent toggles do not cancel out silently.
    pub async fn toggle_active(store: &dyn Store, id: Uuid) -> Result<FlashcardSet, AppError> {
        let current = Self::find(store, id).await?;
        let guard = [Condition::eq("active", current.active)];
        let update = Update::new().set("active", !current.active);
        store
            .update(Collection::Flashcards, id, &guard, &update)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("flashcard set {} changed concurrently", id)))?
            .decode()
    }

    async fn find(store: &dyn Store, id: Uuid) -> Result<FlashcardSet, AppError> {
        store
            .get(Collection::Flashcards, id)
            .await?
            .ok_or_else(|| flashcard_not_found(id))?
            .decode()
    }
}

fn build_cards(cards: Vec<NewCard>) -> Result<Vec<Card>, AppError> {
    if cards.is_empty() {
        return Err(AppError::Validation("cards must contain at least one card".into()));
    }
    Ok(cards.into_iter().map(NewCard::into_card).collect())
}

async fn require_class(store: &dyn Store, class_id: Uuid) -> Result<(), AppError> {
    match store.get(Collection::Classes, class_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::invalid_classes([class_id])),
    }
}

fn flashcard_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("flashcard set {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewClass, NewUser};
    use crate::service::{ClassService, UserService};
    use crate::store::MemoryStore;

    async fn setup(store: &MemoryStore) -> (Uuid, Uuid) {
        let teacher = UserService::create(
            store,
            NewUser {
                name: "Pak Joko".into(),
                email: "joko@school.id".into(),
                role: Role::Teacher,
                active: true,
            },
        )
        .await
        .unwrap();
        let class = ClassService::create(
            store,
            NewClass {
                name: "Biologi 10".into(),
                teacher_id: teacher.id,
                academic_year: None,
                active: true,
            },
        )
        .await
        .unwrap()
        .class;
        (teacher.id, class.id)
    }

    fn card(question: &str, answer: &str) -> NewCard {
        NewCard {
            question: question.into(),
            answer: answer.into(),
        }
    }

    fn new_set(class_id: Uuid, teacher_id: Uuid, cards: Vec<NewCard>) -> NewFlashcardSet {
        NewFlashcardSet {
            title: "Cells".into(),
            topic: "Cell biology".into(),
            description: "Organelles and what they do.".into(),
            class_id,
            teacher_id,
            cards,
        }
    }

    #[tokio::test]
    async fn card_count_follows_cards() {
        let store = MemoryStore::new();
        let (teacher, class) = setup(&store).await;
        let set = FlashcardService::create(&store, new_set(class, teacher, vec![card("What is a cell?", "A unit of life")]))
            .await
            .unwrap();
        assert_eq!(set.card_count, 1);
        assert_ne!(set.cards[0].id, Uuid::nil());

        let patch = FlashcardPatch {
            cards: Some(vec![card("Nucleus?", "Holds DNA"), card("Ribosome?", "Makes protein")]),
            ..Default::default()
        };
        let updated = FlashcardService::update(&store, set.id, patch).await.unwrap();
        assert_eq!(updated.card_count, 2);

        let patch = FlashcardPatch {
            cards: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            FlashcardService::update(&store, set.id, patch).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn create_checks_teacher_and_class() {
        let store = MemoryStore::new();
        let (teacher, class) = setup(&store).await;
        let err = FlashcardService::create(&store, new_set(class, Uuid::new_v4(), vec![card("Q??", "A")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidReference { kind: "user", .. }));
        let err = FlashcardService::create(&store, new_set(Uuid::new_v4(), teacher, vec![card("Q??", "A")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidReference { kind: "class", .. }));
    }

    #[tokio::test]
    async fn toggle_hides_from_class_listing_and_views_count() {
        let store = MemoryStore::new();
        let (teacher, class) = setup(&store).await;
        let set = FlashcardService::create(&store, new_set(class, teacher, vec![card("Q??", "A")]))
            .await
            .unwrap();
        assert_eq!(FlashcardService::get(&store, set.id).await.unwrap().total_views, 1);

        let toggled = FlashcardService::toggle_active(&store, set.id).await.unwrap();
        assert!(!toggled.active);
        assert!(FlashcardService::list_by_class(&store, class).await.unwrap().is_empty());
        let filter = FlashcardFilter {
            teacher_id: Some(teacher),
            ..Default::default()
        };
        assert_eq!(FlashcardService::list(&store, &filter, Page::default()).await.unwrap().len(), 1);
    }
}
