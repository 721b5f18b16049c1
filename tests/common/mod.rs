//! Restaurant domain shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use chronicle::{
    Aggregate, DomainEvent, EventSet, Registry, Repository, Root, UnhandledEvent,
    store::inmemory,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Events
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct RestaurantCreated {
    pub name: String,
    pub info: String,
    pub menu: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct Scheduled {
    pub on: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct Rescheduled {
    pub on: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct MealSelected {
    pub person: String,
    pub meal: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct MealChanged {
    pub person: String,
    pub previous_meal: String,
    pub new_meal: String,
}

/// Recorded by other systems; the restaurant has no handler for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct Canceled {
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, EventSet)]
pub enum RestaurantEvent {
    Created(RestaurantCreated),
    Scheduled(Scheduled),
    Rescheduled(Rescheduled),
    MealSelected(MealSelected),
    MealChanged(MealChanged),
    Canceled(Canceled),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
pub struct RestaurantSnapshot {
    pub name: String,
    pub info: String,
    pub menu: Vec<String>,
    pub scheduled: Option<DateTime<Utc>>,
    pub choices: BTreeMap<String, String>,
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RestaurantError {
    #[error("restaurant {0} is already created")]
    AlreadyCreated(String),
    #[error("restaurant not created yet")]
    NotCreated,
    #[error("restaurant {0} can not be scheduled in past")]
    InPast(String),
    #[error("can not be rescheduled, food has been chosen by some people")]
    MealsChosen,
    #[error("restaurant is not scheduled yet")]
    NotScheduled,
    #[error(transparent)]
    Unhandled(#[from] UnhandledEvent),
}

#[derive(Debug, Default)]
pub struct Restaurant {
    root: Root<RestaurantEvent>,
    pub name: String,
    pub info: String,
    pub menu: Vec<String>,
    pub created: bool,
    pub scheduled: Option<DateTime<Utc>>,
    pub choices: BTreeMap<String, String>,
}

impl Restaurant {
    pub fn create(&mut self, name: &str, info: &str, menu: &[&str]) -> Result<(), RestaurantError> {
        if self.created {
            return Err(RestaurantError::AlreadyCreated(self.name.clone()));
        }
        self.apply(RestaurantCreated {
            name: name.to_string(),
            info: info.to_string(),
            menu: menu.iter().map(ToString::to_string).collect(),
        })?;
        Ok(())
    }

    pub fn schedule(&mut self, on: DateTime<Utc>) -> Result<(), RestaurantError> {
        if !self.created {
            return Err(RestaurantError::NotCreated);
        }
        if on <= Utc::now() {
            return Err(RestaurantError::InPast(self.name.clone()));
        }
        if !self.choices.is_empty() {
            return Err(RestaurantError::MealsChosen);
        }
        if self.scheduled.is_some() {
            self.apply(Rescheduled { on })?;
        } else {
            self.apply(Scheduled { on })?;
        }
        Ok(())
    }

    pub fn choose_meal(&mut self, person: &str, meal: &str) -> Result<(), RestaurantError> {
        if !self.created {
            return Err(RestaurantError::NotCreated);
        }
        if self.scheduled.is_none() {
            return Err(RestaurantError::NotScheduled);
        }
        match self.choices.get(person) {
            Some(previous) => self.apply(MealChanged {
                person: person.to_string(),
                previous_meal: previous.clone(),
                new_meal: meal.to_string(),
            })?,
            None => self.apply(MealSelected {
                person: person.to_string(),
                meal: meal.to_string(),
            })?,
        }
        Ok(())
    }

    /// Records a cancellation, which this aggregate cannot apply.
    pub fn cancel(&mut self, reason: &str) -> Result<(), RestaurantError> {
        self.apply(Canceled {
            reason: reason.to_string(),
        })?;
        Ok(())
    }
}

impl Aggregate for Restaurant {
    type Event = RestaurantEvent;
    type Snapshot = RestaurantSnapshot;

    const KIND: &'static str = "restaurant";

    fn root(&self) -> &Root<RestaurantEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut Root<RestaurantEvent> {
        &mut self.root
    }

    fn mutate(&mut self, event: &RestaurantEvent) -> Result<(), UnhandledEvent> {
        match event {
            RestaurantEvent::Created(e) => {
                self.name.clone_from(&e.name);
                self.info.clone_from(&e.info);
                self.menu.clone_from(&e.menu);
                self.created = true;
            }
            RestaurantEvent::Scheduled(Scheduled { on })
            | RestaurantEvent::Rescheduled(Rescheduled { on }) => {
                self.scheduled = Some(*on);
            }
            RestaurantEvent::MealSelected(e) => {
                self.choices.insert(e.person.clone(), e.meal.clone());
            }
            RestaurantEvent::MealChanged(e) => {
                self.choices.insert(e.person.clone(), e.new_meal.clone());
            }
            RestaurantEvent::Canceled(_) => return Err(UnhandledEvent::new::<Self>(event)),
        }
        Ok(())
    }

    fn take_snapshot(&self) -> RestaurantSnapshot {
        RestaurantSnapshot {
            name: self.name.clone(),
            info: self.info.clone(),
            menu: self.menu.clone(),
            scheduled: self.scheduled,
            choices: self.choices.clone(),
        }
    }

    fn restore_snapshot(&mut self, snapshot: RestaurantSnapshot) {
        self.created = !snapshot.name.is_empty();
        self.name = snapshot.name;
        self.info = snapshot.info;
        self.menu = snapshot.menu;
        self.scheduled = snapshot.scheduled;
        self.choices = snapshot.choices;
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Every restaurant payload except [`Canceled`].
pub fn registry() -> Registry<RestaurantEvent> {
    Registry::default()
        .with::<RestaurantCreated>()
        .with::<Scheduled>()
        .with::<Rescheduled>()
        .with::<MealSelected>()
        .with::<MealChanged>()
}

pub fn repository(store: inmemory::Store) -> Repository<Restaurant, inmemory::Store> {
    Repository::new(store, registry())
}

pub fn tomorrow() -> DateTime<Utc> {
    Utc::now() + Duration::days(1)
}

/// A created and scheduled restaurant with nothing pending.
pub async fn saved_restaurant(repository: &Repository<Restaurant, inmemory::Store>) -> Restaurant {
    let mut restaurant = repository.aggregate();
    restaurant
        .create("PasiBus", "good burgers", &["BBQ", "Eggy", "Gonzo"])
        .unwrap();
    restaurant.schedule(tomorrow()).unwrap();
    repository.save(&mut restaurant).await.unwrap();
    restaurant
}
